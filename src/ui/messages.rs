//! Textos fijos de las respuestas del bot.

pub const ERROR: &str = "❌ Algo salió mal.";
pub const USE_IN_SERVER: &str = "⚠️ Este comando solo funciona dentro de un servidor.";
pub const NO_VOICE_CHANNEL: &str = "⚠️ Únete a un canal de voz primero.";
pub const SAME_VOICE_CHANNEL: &str = "⚠️ Tienes que estar en el mismo canal de voz que el bot.";
pub const NOTHING_PLAYING: &str = "🔇 No hay nada reproduciéndose.";
pub const NO_KEYWORDS: &str = "❌ Escribe qué quieres escuchar.";
pub const NO_RESULTS: &str = "🔍 No encontré resultados.";
pub const SEARCH_HELP: &str = "Envía el número de la canción, o `0` para cancelar.";
pub const SEARCH_CANCELLED: &str = "❎ Búsqueda cancelada.";
pub const EXPIRED_SELECTION: &str = "⌛ Esa búsqueda ya no está disponible.";
pub const SKIPPED: &str = "⏭️ Canción saltada.";
pub const QUEUE_FINISHED: &str = "📭 No quedan canciones en la cola.";
pub const CLEARED: &str = "🗑️ Cola vaciada.";
pub const LEFT: &str = "👋 ¡Hasta luego!";
pub const INVALID_SEEK: &str =
    "❌ Tiempo inválido. Usa `SS`, `MM:SS`, `HH:MM:SS` o algo como `1m30s`.";
pub const SEEK_PAST_END: &str = "❌ Ese tiempo está más allá del final de la canción.";
pub const NO_LYRICS: &str = "📝 No encontré la letra de esta canción.";
pub const QUEUE_EMPTY: &str = "📭 La cola está vacía.";
pub const QUEUE_RETIRED: &str = "⚠️ La cola se reinició mientras agregabas la canción, inténtalo de nuevo.";

//! Stand-in for the AI responder: echoes the utterance back as a chat-style
//! markdown reply so every cleanser path is exercised on the way out.

pub fn compose_reply(utterance: &str, turn: usize, language: &str) -> String {
    let words = utterance.split_whitespace().count();
    let chars = utterance.chars().count();

    if language.to_ascii_lowercase().starts_with("en") {
        format!(
            "## Reply {turn}\n\n\
             **I heard:** _{utterance}_\n\n\
             | Measure | Value |\n\
             |---|---|\n\
             | Words | {words} |\n\
             | Characters | {chars} |\n\n\
             <data>{{\"turn\":{turn},\"words\":{words}}}</data>\n\n\
             Anything else you would like to say? 🙂"
        )
    } else {
        format!(
            "## Yanıt {turn}\n\n\
             **Duydum:** _{utterance}_\n\n\
             | Ölçü | Değer |\n\
             |---|---|\n\
             | Kelime | {words} |\n\
             | Karakter | {chars} |\n\n\
             <data>{{\"turn\":{turn},\"words\":{words}}}</data>\n\n\
             Başka bir şey söylemek ister misiniz? 🙂"
        )
    }
}

// Email collaborators: MIME parsing of inbound messages and SMTP submission
// of outbound ones. Neither makes moderation decisions.

pub mod parse;
pub mod transport;

/// The text scored for a mail transaction: envelope-style headers, a blank
/// line, then the body. Shared by /send-email and the relay so both entry
/// points analyze the same shape of content.
pub fn compose_content(from: &str, to: &[String], subject: &str, body: &str) -> String {
    format!(
        "From: {from}\nTo: {}\nSubject: {subject}\n\n{body}",
        to.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_content() {
        let content = compose_content(
            "a@x",
            &["b@x".to_string(), "c@x".to_string()],
            "Hi",
            "Body",
        );
        assert_eq!(content, "From: a@x\nTo: b@x, c@x\nSubject: Hi\n\nBody");
    }
}

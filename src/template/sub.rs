//! Lexer for `Fn::Sub` bodies using logos

use logos::Logos;

use crate::error::{CompileError, Result};

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum SubToken {
    /// `${!Literal}` renders as `${Literal}`
    #[regex(r"\$\{![^}]*\}")]
    Escaped,

    #[regex(r"\$\{[^}!][^}]*\}")]
    Placeholder,

    #[regex(r"[^$]+")]
    Text,

    #[token("$")]
    Dollar,
}

/// A piece of a substitution body
#[derive(Debug, Clone, PartialEq)]
pub enum SubFragment {
    Literal(String),
    /// `${Name}`
    Ref(String),
    /// `${Name.Attribute}`
    GetAtt { logical_id: String, attribute: String },
}

/// Split a substitution body into literal text and placeholders
pub fn parse_sub(body: &str) -> Result<Vec<SubFragment>> {
    fn push_literal(fragments: &mut Vec<SubFragment>, text: &str) {
        if let Some(SubFragment::Literal(last)) = fragments.last_mut() {
            last.push_str(text);
        } else {
            fragments.push(SubFragment::Literal(text.to_string()));
        }
    }

    let mut fragments: Vec<SubFragment> = Vec::new();
    for (token, span) in SubToken::lexer(body).spanned() {
        let slice = &body[span.clone()];
        let token = token.map_err(|_| {
            CompileError::shape(format!(
                "Invalid substitution at offset {} in: {}",
                span.start, body
            ))
        })?;
        match token {
            SubToken::Text | SubToken::Dollar => push_literal(&mut fragments, slice),
            SubToken::Escaped => {
                let inner = &slice[3..slice.len() - 1];
                push_literal(&mut fragments, &format!("${{{}}}", inner));
            }
            SubToken::Placeholder => {
                let name = slice[2..slice.len() - 1].trim();
                fragments.push(match name.split_once('.') {
                    Some((logical_id, attribute)) => SubFragment::GetAtt {
                        logical_id: logical_id.to_string(),
                        attribute: attribute.to_string(),
                    },
                    None => SubFragment::Ref(name.to_string()),
                });
            }
        }
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text() {
        assert_eq!(
            parse_sub("hello world").unwrap(),
            vec![SubFragment::Literal("hello world".to_string())]
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            parse_sub("arn:${AWS::Partition}:s3:::${Bucket.Arn}/*").unwrap(),
            vec![
                SubFragment::Literal("arn:".to_string()),
                SubFragment::Ref("AWS::Partition".to_string()),
                SubFragment::Literal(":s3:::".to_string()),
                SubFragment::GetAtt {
                    logical_id: "Bucket".to_string(),
                    attribute: "Arn".to_string()
                },
                SubFragment::Literal("/*".to_string()),
            ]
        );
    }

    #[test]
    fn test_escape_and_lone_dollar() {
        assert_eq!(
            parse_sub("cost $5 ${!Literal}").unwrap(),
            vec![SubFragment::Literal("cost $5 ${Literal}".to_string())]
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        assert_eq!(
            parse_sub("${Open").unwrap(),
            vec![SubFragment::Literal("${Open".to_string())]
        );
    }
}

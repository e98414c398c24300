//! Server-rendered chat page.
//!
//! User text is always HTML-escaped. Assistant replies are rendered from
//! Markdown with any raw HTML in the reply demoted to escaped text, and
//! link or image targets outside `http`, `https` and `mailto` blanked.

use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};

use relay_core::types::{Speaker, Turn};

/// A one-line annotation shown under the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Prompt tokens billed for the latest exchange.
    InputTokens(u32),
    /// The latest exchange failed; the transcript is unchanged.
    Error(String),
}

/// Everything needed to render one page.
#[derive(Debug, Clone)]
pub struct PageView<'a> {
    pub session_id: &'a str,
    pub system_prompt: &'a str,
    pub transcript: &'a [Turn],
    pub notice: Option<Notice>,
}

const SAFE_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Whether a link target may be emitted as-is. Relative targets carry no
/// scheme and are allowed.
fn is_safe_url(url: &str) -> bool {
    // Browsers ignore whitespace and control characters inside a scheme.
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    match cleaned.find(|c: char| matches!(c, ':' | '/' | '?' | '#')) {
        Some(idx) if cleaned[idx..].starts_with(':') => {
            let scheme = cleaned[..idx].to_ascii_lowercase();
            SAFE_URL_SCHEMES.contains(&scheme.as_str())
        }
        _ => true,
    }
}

fn sanitize_event(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed(""),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed(""),
            title,
            id,
        }),
        other => other,
    }
}

/// Render an assistant reply from Markdown to HTML.
pub fn render_markdown(text: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(text, options).map(sanitize_event);

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn render_turn(turn: &Turn) -> String {
    match turn.role {
        Speaker::User => format!(
            "<div class=\"turn user\"><div class=\"who\">You</div><div class=\"body\">{}</div></div>\n",
            encode_text(&turn.text)
        ),
        Speaker::Assistant => format!(
            "<div class=\"turn assistant\"><div class=\"who\">Assistant</div><div class=\"body\">{}</div></div>\n",
            render_markdown(&turn.text)
        ),
    }
}

fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::InputTokens(n) => format!("<p class=\"notice\">Input tokens: {}</p>\n", n),
        Notice::Error(msg) => format!("<p class=\"notice error\">Error: {}</p>\n", encode_text(msg)),
    }
}

/// Render the full chat page.
pub fn render_page(view: &PageView<'_>) -> String {
    let transcript: String = view.transcript.iter().map(render_turn).collect();
    let notice = view.notice.as_ref().map(render_notice).unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Chat</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }}
.turn {{ margin: 0.75rem 0; padding: 0.5rem 0.75rem; border-radius: 6px; }}
.user {{ background: #eef3fb; }}
.assistant {{ background: #f5f5f5; }}
.who {{ font-size: 0.8rem; color: #666; }}
.notice {{ color: #555; font-size: 0.9rem; }}
.error {{ color: #b00020; }}
textarea {{ width: 100%; }}
</style>
</head>
<body>
<h1>Chat</h1>
<div id="transcript">
{transcript}</div>
{notice}<form method="post" action="/chat">
<input type="hidden" name="session" value="{session}">
<label>System prompt<br><textarea name="systemPrompt" rows="2">{system}</textarea></label>
<label>Message<br><textarea name="userText" rows="4" required></textarea></label>
<button type="submit">Send</button>
</form>
</body>
</html>
"#,
        transcript = transcript,
        notice = notice,
        session = encode_double_quoted_attribute(view.session_id),
        system = encode_text(view.system_prompt),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_rendered() {
        let html = render_markdown("**bold** and `code`");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<code>code</code>"));
    }

    #[test]
    fn test_raw_html_in_reply_is_escaped() {
        let html = render_markdown("hi <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_script_link_in_reply_is_blanked() {
        let html = render_markdown("[click me](javascript:alert(document.cookie))");
        assert!(!html.contains("javascript"));
        assert!(html.contains("<a href=\"\">click me</a>"));

        let html = render_markdown("[x](JaVaScRiPt:alert(1)) <vbscript:msgbox> ![img](data:text/html,boom)");
        assert!(!html.to_ascii_lowercase().contains("javascript:"));
        assert!(!html.contains("href=\"vbscript"));
        assert!(!html.contains("data:text/html"));
    }

    #[test]
    fn test_web_links_in_reply_are_kept() {
        let html = render_markdown(
            "[docs](https://example.com/a?b=1) [mail](mailto:a@example.com) [rel](/chat#top)",
        );
        assert!(html.contains("href=\"https://example.com/a?b=1\""));
        assert!(html.contains("href=\"mailto:a@example.com\""));
        assert!(html.contains("href=\"/chat#top\""));
    }

    #[test]
    fn test_url_scheme_check() {
        assert!(is_safe_url("http://example.com"));
        assert!(is_safe_url("HTTPS://example.com"));
        assert!(is_safe_url("relative/path:with-colon"));
        assert!(!is_safe_url("javascript:alert(1)"));
        assert!(!is_safe_url(" java\tscript:alert(1)"));
        assert!(!is_safe_url("data:text/html;base64,AAAA"));
    }

    #[test]
    fn test_user_text_is_escaped_not_rendered() {
        let transcript = vec![Turn::user("<b>**not bold**</b>")];
        let page = render_page(&PageView {
            session_id: "s1",
            system_prompt: "",
            transcript: &transcript,
            notice: None,
        });
        assert!(page.contains("&lt;b&gt;**not bold**&lt;/b&gt;"));
        assert!(!page.contains("<strong>"));
    }

    #[test]
    fn test_page_carries_session_and_notice() {
        let transcript = vec![Turn::user("hello"), Turn::assistant("*hi*")];
        let page = render_page(&PageView {
            session_id: "abc\"def",
            system_prompt: "Be terse.",
            transcript: &transcript,
            notice: Some(Notice::InputTokens(42)),
        });
        assert!(page.contains("name=\"session\" value=\"abc&quot;def\""));
        assert!(page.contains("Input tokens: 42"));
        assert!(page.contains("<em>hi</em>"));
        assert!(page.contains(">Be terse.</textarea>"));
    }

    #[test]
    fn test_error_notice_is_escaped() {
        let page = render_page(&PageView {
            session_id: "s",
            system_prompt: "",
            transcript: &[],
            notice: Some(Notice::Error("<oops>".to_string())),
        });
        assert!(page.contains("Error: &lt;oops&gt;"));
    }
}

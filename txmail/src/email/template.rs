//! Transaction notification template.
//!
//! Both bodies are embedded at compile time and registered once. The `.html`
//! template is autoescaped by tera; the `.txt` one is not.

use std::sync::LazyLock;

use tera::{Context, Tera};

use super::SendError;

/// Subject line of every transaction notification.
pub const TRANSACTION_SUBJECT: &str = "Transaction Notification";

const HTML_TEMPLATE: &str = "transaction.html";
const TEXT_TEMPLATE: &str = "transaction.txt";

static ENGINE: LazyLock<Result<Tera, String>> = LazyLock::new(|| -> Result<Tera, String> {
    let mut engine = Tera::default();
    engine
        .add_raw_templates(vec![
            (HTML_TEMPLATE, include_str!("../../templates/transaction.html")),
            (TEXT_TEMPLATE, include_str!("../../templates/transaction.txt")),
        ])
        .map_err(|e| e.to_string())?;
    Ok(engine)
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBody {
    pub html: String,
    pub text: String,
}

/// Render the HTML and plain-text bodies for a processed transaction.
pub fn render_transaction_email(amount: f64, description: &str) -> Result<RenderedBody, SendError> {
    let engine = ENGINE.as_ref().map_err(|e| SendError::Build(e.clone()))?;

    let mut context = Context::new();
    context.insert("amount", &format!("{amount:.2}"));
    context.insert("description", description);

    let html = engine
        .render(HTML_TEMPLATE, &context)
        .map_err(|e| SendError::Build(e.to_string()))?;
    let text = engine
        .render(TEXT_TEMPLATE, &context)
        .map_err(|e| SendError::Build(e.to_string()))?;

    Ok(RenderedBody { html, text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_register() {
        assert!(ENGINE.is_ok());
    }

    #[test]
    fn test_render_formats_amount() {
        let body = render_transaction_email(10.0, "Coffee").unwrap();
        assert!(body.html.starts_with("<h1>Transaction Successful</h1>"));
        assert!(body.html.contains("<li>Amount: $10.00</li>"));
        assert!(body.html.contains("<li>Description: Coffee</li>"));
        assert_eq!(body.text, "Transaction Successful! Amount: $10.00, Description: Coffee");
    }

    #[test]
    fn test_render_rounds_to_cents() {
        let body = render_transaction_email(99.999, "x").unwrap();
        assert!(body.text.contains("$100.00"));
        assert!(body.html.contains("$100.00"));
    }

    #[test]
    fn test_description_escaped_in_html_only() {
        let body = render_transaction_email(1.5, "<b>Tom & Jerry</b>").unwrap();
        assert!(body.html.contains("&lt;b&gt;Tom &amp; Jerry&lt;"));
        assert!(!body.html.contains("<b>"));
        assert!(body.text.ends_with("<b>Tom & Jerry</b>"));
    }
}

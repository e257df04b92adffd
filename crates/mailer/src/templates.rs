//! Notification rendering with HTML (Askama) and SCSS styling.
//!
//! Rendering is pure: no I/O, deterministic output for a given set of
//! fields. Missing required fields are a caller contract violation and fail
//! fast instead of producing a body with blank placeholders.

use askama::Template;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::notify::NotificationKind;

/// Compiled and inlined CSS from SCSS
static COMPILED_CSS: Lazy<String> = Lazy::new(|| {
    let scss = include_str!("../styles/email.scss");
    grass::from_string(scss.to_string(), &grass::Options::default())
        .expect("Failed to compile SCSS")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

/// The rendered parts of a notification, independent of transport.
#[derive(Debug, Clone)]
pub struct RenderedParts {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Inline CSS into HTML
fn inline_css(html: &str) -> String {
    let options = css_inline::InlineOptions {
        load_remote_stylesheets: false,
        ..css_inline::InlineOptions::default()
    };

    let inliner = css_inline::CSSInliner::new(options);

    // Inject the compiled CSS into the HTML
    let html_with_style = html.replace(
        "</head>",
        &format!("<style>{}</style></head>", COMPILED_CSS.as_str()),
    );

    match inliner.inline(&html_with_style) {
        Ok(inlined) => inlined,
        Err(e) => {
            tracing::error!(
                name = "templates.inline_css.failed",
                error = ?e,
                message = "Failed to inline CSS"
            );
            html.to_string()
        }
    }
}

#[derive(Template)]
#[template(path = "reset_request_email.html")]
pub struct ResetRequestEmailTemplate {
    pub recipient_name: String,
    pub reset_url: String,
    pub token: String,
}

impl ResetRequestEmailTemplate {
    pub fn render_html(&self) -> Result<String, askama::Error> {
        let html = self.render()?;
        Ok(inline_css(&html))
    }

    pub fn render_text(&self) -> String {
        format!(
            r#"Hello {},

We received a request to reset your password. If you didn't make this
request, you can safely ignore this email.

Reset your password using the link below:
{}

If the link doesn't work, enter this reset token manually:
{}

The link and token can only be used once and expire after a short time.
Your password won't change until you create a new one.

Best regards,
The Account Services Team"#,
            self.recipient_name, self.reset_url, self.token
        )
    }
}

#[derive(Template)]
#[template(path = "reset_confirmation_email.html")]
pub struct ResetConfirmationEmailTemplate {
    pub recipient_name: String,
    pub login_url: String,
}

impl ResetConfirmationEmailTemplate {
    pub fn render_html(&self) -> Result<String, askama::Error> {
        let html = self.render()?;
        Ok(inline_css(&html))
    }

    pub fn render_text(&self) -> String {
        format!(
            r#"Hello {},

Your password has been successfully reset. You can now sign in with your
new password at {}

If you didn't make this change, please contact your administrator
immediately.

Best regards,
The Account Services Team"#,
            self.recipient_name, self.login_url
        )
    }
}

/// Template for the operator-triggered connectivity test message.
#[derive(Template)]
#[template(path = "connectivity_test_email.html")]
pub struct ConnectivityTestEmailTemplate {}

impl ConnectivityTestEmailTemplate {
    pub fn render_html(&self) -> Result<String, askama::Error> {
        let html = self.render()?;
        Ok(inline_css(&html))
    }

    pub fn render_text(&self) -> String {
        "This is a connectivity test message from the account recovery mailer.\n\
         If you received it, outbound email delivery is working. No action is\n\
         required."
            .to_string()
    }
}

/// Render the notification payload for `kind` from named fields.
pub fn render(
    kind: NotificationKind,
    fields: &BTreeMap<String, String>,
) -> Result<RenderedParts, RenderError> {
    match kind {
        NotificationKind::ResetRequest => {
            let template = ResetRequestEmailTemplate {
                recipient_name: required(fields, "recipient_name")?.to_string(),
                reset_url: required(fields, "reset_url")?.to_string(),
                token: required(fields, "token")?.to_string(),
            };
            Ok(RenderedParts {
                subject: "Password Reset Request".to_string(),
                html_body: template.render_html()?,
                text_body: template.render_text(),
            })
        }
        NotificationKind::ResetConfirmation => {
            let template = ResetConfirmationEmailTemplate {
                recipient_name: required(fields, "recipient_name")?.to_string(),
                login_url: required(fields, "login_url")?.to_string(),
            };
            Ok(RenderedParts {
                subject: "Password Reset Successful".to_string(),
                html_body: template.render_html()?,
                text_body: template.render_text(),
            })
        }
        NotificationKind::ConnectivityTest => {
            let template = ConnectivityTestEmailTemplate {};
            Ok(RenderedParts {
                subject: "Connectivity Test".to_string(),
                html_body: template.render_html()?,
                text_body: template.render_text(),
            })
        }
    }
}

fn required<'a>(
    fields: &'a BTreeMap<String, String>,
    name: &'static str,
) -> Result<&'a str, RenderError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(RenderError::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_fields() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("recipient_name".to_string(), "Ann".to_string()),
            (
                "reset_url".to_string(),
                "https://portal.example.com/reset-password?token=tok123abc".to_string(),
            ),
            ("token".to_string(), "tok123abc".to_string()),
        ])
    }

    #[test]
    fn reset_request_contains_token_and_link() {
        let parts = render(NotificationKind::ResetRequest, &reset_fields())
            .expect("Failed to render reset request");

        assert_eq!(parts.subject, "Password Reset Request");
        // The token appears verbatim in both bodies so a user can complete
        // the flow even when link-clicking is blocked by their mail client.
        assert!(parts.html_body.contains("tok123abc"));
        assert!(parts.text_body.contains("tok123abc"));
        assert!(
            parts
                .text_body
                .contains("https://portal.example.com/reset-password?token=tok123abc")
        );
        assert!(parts.html_body.contains("Ann"));
        // CSS got inlined
        assert!(parts.html_body.contains("style="));
    }

    #[test]
    fn reset_request_missing_token_fails_fast() {
        let mut fields = reset_fields();
        fields.remove("token");
        let err = render(NotificationKind::ResetRequest, &fields).unwrap_err();
        assert!(matches!(err, RenderError::MissingField("token")));

        // Empty values count as missing, never as blank placeholders.
        let mut fields = reset_fields();
        fields.insert("reset_url".to_string(), String::new());
        let err = render(NotificationKind::ResetRequest, &fields).unwrap_err();
        assert!(matches!(err, RenderError::MissingField("reset_url")));
    }

    #[test]
    fn reset_confirmation_contains_login_url() {
        let fields = BTreeMap::from([
            ("recipient_name".to_string(), "Ann".to_string()),
            (
                "login_url".to_string(),
                "https://portal.example.com/login".to_string(),
            ),
        ]);
        let parts = render(NotificationKind::ResetConfirmation, &fields)
            .expect("Failed to render confirmation");

        assert_eq!(parts.subject, "Password Reset Successful");
        assert!(parts.html_body.contains("https://portal.example.com/login"));
        assert!(parts.text_body.contains("successfully reset"));
    }

    #[test]
    fn reset_confirmation_requires_recipient_name() {
        let fields = BTreeMap::from([(
            "login_url".to_string(),
            "https://portal.example.com/login".to_string(),
        )]);
        let err = render(NotificationKind::ResetConfirmation, &fields).unwrap_err();
        assert!(matches!(err, RenderError::MissingField("recipient_name")));
    }

    #[test]
    fn connectivity_test_needs_no_fields() {
        let parts = render(NotificationKind::ConnectivityTest, &BTreeMap::new())
            .expect("Failed to render connectivity test");
        assert_eq!(parts.subject, "Connectivity Test");
        assert!(parts.text_body.contains("connectivity test"));
        assert!(parts.html_body.contains("delivery is working"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let first = render(NotificationKind::ResetRequest, &reset_fields()).unwrap();
        let second = render(NotificationKind::ResetRequest, &reset_fields()).unwrap();
        assert_eq!(first.html_body, second.html_body);
        assert_eq!(first.text_body, second.text_body);
    }

    #[test]
    fn test_scss_compilation() {
        let css = &*COMPILED_CSS;
        assert!(!css.is_empty());
        assert!(css.contains("email-container"));
    }
}

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EmailProvider, MailConfig};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Everything the signup email needs to tell the recipient.
#[derive(Debug, Clone)]
pub struct SignupEmail {
    pub to: String,
    pub recipient_name: String,
    pub code: String,
    pub ttl_minutes: i64,
    pub verification_code_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_signup_email(&self, mail: &SignupEmail) -> anyhow::Result<()>;
}

pub fn build_mailer(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match cfg.provider {
        EmailProvider::Log => Ok(Arc::new(LogMailer::new(&cfg.app_url)?)),
        EmailProvider::Sendgrid => {
            let key = cfg
                .sendgrid_api_key
                .clone()
                .context("SENDGRID_API_KEY is required for the sendgrid provider")?;
            Ok(Arc::new(SendgridMailer::new(key, &cfg.from, &cfg.app_url)?))
        }
    }
}

/// `{app_url}/verify?verificationCodeId=<id>&source=email`
pub fn verify_url(app_url: &Url, verification_code_id: Uuid) -> anyhow::Result<Url> {
    let mut url = app_url.join("/verify").context("build verify url")?;
    url.query_pairs_mut()
        .append_pair("verificationCodeId", &verification_code_id.to_string())
        .append_pair("source", "email");
    Ok(url)
}

impl SignupEmail {
    pub fn render(&self, app_url: &Url) -> anyhow::Result<RenderedEmail> {
        let link = verify_url(app_url, self.verification_code_id)?;
        let name = match self.recipient_name.trim() {
            "" => "there",
            n => n,
        };

        let text = format!(
            "Hi {name},\n\
             Your verification code is: {code}\n\
             It expires in {ttl} minutes.\n\
             Open the verification page with this link:\n\
             {link}\n\
             Then enter your code on that page to verify your email.\n\
             Regards,\n\
             Book Tracker\n",
            code = self.code,
            ttl = self.ttl_minutes,
        );

        let link_html = escape_html(link.as_str());
        let html = format!(
            "<p>Hi {name},</p>\
             <p>Your verification code is: <strong>{code}</strong></p>\
             <p>It expires in {ttl} minutes.</p>\
             <p>Click here to verify your email:<br><a href=\"{link_html}\">{link_html}</a></p>\
             <p>Regards,<br>Book Tracker</p>",
            name = escape_html(name),
            code = self.code,
            ttl = self.ttl_minutes,
        );

        Ok(RenderedEmail {
            subject: "Your Book Tracker verification code".to_string(),
            text,
            html,
        })
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Development transport: the rendered mail goes to the log instead of a relay.
pub struct LogMailer {
    app_url: Url,
}

impl LogMailer {
    pub fn new(app_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            app_url: Url::parse(app_url).context("parse APP_URL")?,
        })
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_signup_email(&self, mail: &SignupEmail) -> anyhow::Result<()> {
        let rendered = mail.render(&self.app_url)?;
        info!(to = %mail.to, subject = %rendered.subject, "signup email (log transport)");
        debug!(body = %rendered.text, "signup email body");
        Ok(())
    }
}

pub struct SendgridMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    app_url: Url,
}

impl SendgridMailer {
    pub fn new(api_key: String, from: &str, app_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            from: from.to_string(),
            app_url: Url::parse(app_url).context("parse APP_URL")?,
        })
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    async fn send_signup_email(&self, mail: &SignupEmail) -> anyhow::Result<()> {
        let rendered = mail.render(&self.app_url)?;
        let body = json!({
            "personalizations": [{ "to": [{ "email": mail.to }] }],
            "from": { "email": self.from },
            "subject": rendered.subject,
            "content": [
                { "type": "text/plain", "value": rendered.text },
                { "type": "text/html", "value": rendered.html },
            ],
        });

        self.client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("sendgrid request")?
            .error_for_status()
            .context("sendgrid rejected the message")?;

        info!(to = %mail.to, "signup email sent via sendgrid");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> SignupEmail {
        SignupEmail {
            to: "alice@example.com".into(),
            recipient_name: name.into(),
            code: "042137".into(),
            ttl_minutes: 10,
            verification_code_id: Uuid::nil(),
        }
    }

    #[test]
    fn verify_url_carries_code_id_and_source() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let url = verify_url(&base, Uuid::nil()).unwrap();
        assert_eq!(url.path(), "/verify");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("verificationCodeId".into(), Uuid::nil().to_string()),
                ("source".into(), "email".into()),
            ]
        );
    }

    #[test]
    fn render_includes_code_ttl_and_link() {
        let base = Url::parse("https://books.example.org/app/").unwrap();
        let rendered = sample("Alice").render(&base).unwrap();
        assert!(rendered.text.contains("Hi Alice,"));
        assert!(rendered.text.contains("042137"));
        assert!(rendered.text.contains("10 minutes"));
        assert!(rendered
            .text
            .contains("https://books.example.org/verify?verificationCodeId="));
        assert!(rendered.html.contains("<strong>042137</strong>"));
    }

    #[test]
    fn render_falls_back_to_generic_greeting_and_escapes_html() {
        let base = Url::parse("http://localhost:3000").unwrap();
        assert!(sample("   ").render(&base).unwrap().text.contains("Hi there,"));

        let html = sample("<b>Eve</b>").render(&base).unwrap().html;
        assert!(html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(!html.contains("<b>Eve</b>"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_mail() {
        let mailer = LogMailer::new("http://localhost:3000").unwrap();
        mailer.send_signup_email(&sample("Alice")).await.unwrap();
    }
}

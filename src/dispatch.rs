use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::{
    config::TransportConfig,
    error::{RelayError, TransportError, ValidationError},
    router::TransportName,
};

/// Anything that can hand a finished message to an upstream provider.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// SMTP provider backed by lettre's pooled async transport.
#[derive(Clone)]
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let relay = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        };
        let builder = relay.map_err(|e| {
            TransportError::new(format!("Failed to create SMTP relay {}: {}", config.host, e))
        })?;

        let mut builder = builder.port(config.port);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.timeout(Some(timeout));
        }
        if let Some(creds) = &config.credentials {
            builder = builder.credentials(Credentials::new(
                creds.username.clone(),
                creds.password.clone(),
            ));
        }

        Ok(Self {
            inner: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let response = self
            .inner
            .send(message)
            .await
            .map_err(|e| TransportError::new(format!("Failed to send email: {}", e)))?;

        debug!(code = %response.code(), "SMTP server accepted message");
        Ok(())
    }
}

/// The two named upstreams. Sending never retries and never switches
/// transports on its own.
#[derive(Clone)]
pub struct MailDispatcher {
    primary: Arc<dyn MailTransport>,
    fallback: Arc<dyn MailTransport>,
}

impl MailDispatcher {
    pub fn new(primary: Arc<dyn MailTransport>, fallback: Arc<dyn MailTransport>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(
        primary: &TransportConfig,
        fallback: &TransportConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            Arc::new(SmtpTransport::new(primary)?),
            Arc::new(SmtpTransport::new(fallback)?),
        ))
    }

    pub async fn send(&self, transport: TransportName, message: Message) -> Result<(), TransportError> {
        match transport {
            TransportName::Primary => self.primary.send(message).await,
            TransportName::Fallback => self.fallback.send(message).await,
        }
    }
}

/// Builds the outgoing HTML message.
pub fn build_message(from: Mailbox, to: &str, subject: &str, html: &str) -> Result<Message, RelayError> {
    let to: Mailbox = to.parse().map_err(|_| ValidationError::InvalidEmail)?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|e| TransportError::new(format!("Failed to build email: {}", e)))?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for Recording {
        async fn send(&self, message: Message) -> Result<(), TransportError> {
            let to = message.envelope().to()[0].to_string();
            self.sent.lock().unwrap().push(to);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl MailTransport for Failing {
        async fn send(&self, _message: Message) -> Result<(), TransportError> {
            Err(TransportError::new("535 authentication failed"))
        }
    }

    fn message(to: &str) -> Message {
        build_message("noreply@example.com".parse().unwrap(), to, "Hi", "<p>hi</p>").unwrap()
    }

    #[tokio::test]
    async fn routes_to_the_named_transport_only() {
        let primary = Arc::new(Recording::default());
        let fallback = Arc::new(Recording::default());
        let dispatcher = MailDispatcher::new(primary.clone(), fallback.clone());

        dispatcher.send(TransportName::Primary, message("a@example.com")).await.unwrap();
        dispatcher.send(TransportName::Fallback, message("b@example.com")).await.unwrap();

        assert_eq!(*primary.sent.lock().unwrap(), vec!["a@example.com"]);
        assert_eq!(*fallback.sent.lock().unwrap(), vec!["b@example.com"]);
    }

    #[tokio::test]
    async fn failure_is_passed_through_without_falling_back() {
        let fallback = Arc::new(Recording::default());
        let dispatcher = MailDispatcher::new(Arc::new(Failing), fallback.clone());

        let err = dispatcher
            .send(TransportName::Primary, message("a@example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.message, "535 authentication failed");
        assert!(fallback.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn unparseable_recipient_is_a_validation_error() {
        let err = build_message("noreply@example.com".parse().unwrap(), "nobody", "Hi", "<p/>")
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(ValidationError::InvalidEmail)));
    }

    #[test]
    fn message_is_html() {
        let raw = String::from_utf8(message("a@example.com").formatted()).unwrap();
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("Subject: Hi"));
    }
}

//! Email verification codes and their delivery.

use dashmap::DashMap;
use lettre::{
    Address, AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use rand::prelude::RngExt;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
        })
    }

    pub async fn send_verification_code(&self, to: &Address, code: &str, valid_for: Duration) -> Result<(), Error> {
        let minutes = valid_for.as_secs().div_ceil(60);
        let body = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Your Clarity verification code</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .code {{ font-size: 28px; letter-spacing: 6px; font-weight: bold; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Verify your email address</h2>

        <p>Enter this code in Clarity to confirm your email address:</p>

        <p class="code">{code}</p>

        <p>The code expires in {minutes} minutes. If you didn't request it, you can safely ignore this email.</p>

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        );

        self.send_email(to, "Your Clarity verification code", &body).await
    }

    async fn send_email(&self, to: &Address, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let message = Message::builder()
            .from(from)
            .to(Mailbox::new(None, to.clone()))
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

/// Parse a user-supplied address, rejecting anything lettre would not deliver to.
pub fn parse_address(email: &str) -> Result<Address, Error> {
    email.trim().parse::<Address>().map_err(|_| Error::BadRequest {
        message: "Invalid email address".to_string(),
    })
}

struct PendingCode {
    code: String,
    expires_at: Instant,
    failed_attempts: u32,
}

/// Outstanding verification codes, one per address.
///
/// Issuing a new code replaces the previous one. A code is consumed by a successful check and
/// discarded after [`MAX_FAILED_ATTEMPTS`](Self::MAX_FAILED_ATTEMPTS) wrong guesses.
pub struct VerificationCodes {
    ttl: Duration,
    pending: DashMap<String, PendingCode>,
}

impl VerificationCodes {
    const CODE_LENGTH: usize = 6;
    pub const MAX_FAILED_ATTEMPTS: u32 = 5;

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate and remember a fresh code for `email`.
    pub fn issue(&self, email: &Address) -> String {
        let mut rng = rand::rng();
        let code: String = (0..Self::CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect();

        self.pending.insert(
            key(email),
            PendingCode {
                code: code.clone(),
                expires_at: Instant::now() + self.ttl,
                failed_attempts: 0,
            },
        );
        code
    }

    /// Check a code. Expired codes are discarded, a matching code is consumed and a wrong guess
    /// counts against the code.
    #[instrument(skip(self, code))]
    pub fn verify(&self, email: &Address, code: &str) -> bool {
        let key = key(email);
        let Some(mut pending) = self.pending.get_mut(&key) else {
            return false;
        };

        if pending.expires_at <= Instant::now() {
            drop(pending);
            self.pending.remove(&key);
            return false;
        }

        if pending.code == code.trim() {
            drop(pending);
            self.pending.remove(&key);
            info!("Email address verified");
            return true;
        }

        pending.failed_attempts += 1;
        let exhausted = pending.failed_attempts >= Self::MAX_FAILED_ATTEMPTS;
        drop(pending);
        if exhausted {
            self.pending.remove(&key);
            warn!("Too many wrong guesses, verification code discarded");
        }
        false
    }

    /// Drop expired codes. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.expires_at > now);
        before - self.pending.len()
    }
}

fn key(email: &Address) -> String {
    email.to_string().to_ascii_lowercase()
}


#[cfg(test)]
mod tests {
    use super::test_support::{code_in_message, decode_body};
    use super::*;
    use crate::config::EmailConfig;

    fn address(s: &str) -> Address {
        parse_address(s).unwrap()
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address(" student@example.edu ").is_ok());
        for bad in ["", "student", "@example.edu", "a b@example.edu"] {
            assert!(parse_address(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_is_six_digits_and_single_use() {
        let codes = VerificationCodes::new(Duration::from_secs(600));
        let email = address("student@example.edu");

        let code = codes.issue(&email);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        assert!(!codes.verify(&email, "not-it"));
        // A wrong guess does not consume the code
        assert!(codes.verify(&address("Student@Example.edu"), &code));
        assert!(!codes.verify(&email, &code));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_discarded_after_repeated_wrong_guesses() {
        let codes = VerificationCodes::new(Duration::from_secs(600));
        let email = address("student@example.edu");
        let wrong_guess = |code: &str| if code == "000000" { "111111" } else { "000000" };

        // One guess short of the limit, the right code still works
        let code = codes.issue(&email);
        for _ in 1..VerificationCodes::MAX_FAILED_ATTEMPTS {
            assert!(!codes.verify(&email, wrong_guess(&code)));
        }
        assert!(codes.verify(&email, &code));

        let code = codes.issue(&email);
        for _ in 0..VerificationCodes::MAX_FAILED_ATTEMPTS {
            assert!(!codes.verify(&email, wrong_guess(&code)));
        }
        assert!(!codes.verify(&email, &code));
        assert_eq!(codes.prune(), 0);

        // A fresh code starts with a clean slate
        let fresh = codes.issue(&email);
        assert!(codes.verify(&email, &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires() {
        let codes = VerificationCodes::new(Duration::from_secs(600));
        let email = address("student@example.edu");
        let code = codes.issue(&email);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!codes.verify(&email, &code));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_replaces_code_and_prune() {
        let codes = VerificationCodes::new(Duration::from_secs(60));
        let email = address("student@example.edu");
        let first = codes.issue(&email);
        let second = codes.issue(&email);
        if first != second {
            assert!(!codes.verify(&email, &first));
        }
        codes.issue(&address("other@example.edu"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(codes.prune(), 2);
    }

    #[tokio::test]
    async fn test_verification_email_written_by_file_transport() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            email: EmailConfig {
                transport: EmailTransportConfig::File {
                    path: dir.path().to_string_lossy().into_owned(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let service = EmailService::new(&config).unwrap();

        service
            .send_verification_code(&address("student@example.edu"), "123456", Duration::from_secs(600))
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("student@example.edu"));
        assert_eq!(code_in_message(&contents).as_deref(), Some("123456"));
        assert!(decode_body(&contents).contains("10 minutes"));
    }
}

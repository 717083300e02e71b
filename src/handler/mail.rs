//! SMTP 告警邮件处理器

use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};

use crate::config::SmtpConfig;
use crate::error::AlertError;
use crate::handler::AlertSink;

/// 通过 SMTPS（隐式 TLS）发送告警邮件
pub struct SmtpMailer {
    config: SmtpConfig,
    connector: TlsConnector,
}

impl SmtpMailer {
    /// 使用 webpki 根证书创建邮件处理器
    pub fn new(config: SmtpConfig) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let tls_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            config,
            connector: TlsConnector::from(Arc::new(tls_config)),
        }
    }
}

#[async_trait]
impl AlertSink for SmtpMailer {
    async fn send(&self, from: &str, msg: &[u8]) -> Result<(), AlertError> {
        let config = &self.config;
        let server_name = ServerName::try_from(config.host.as_str())
            .map_err(|_| AlertError::InvalidHost(config.host.clone()))?;

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let tls = self.connector.connect(server_name, tcp).await?;

        let mut session = SmtpSession::new(tls);
        session.deliver(config, from, msg).await
    }
}

/// 一条 SMTP 应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

/// SMTP 会话，不关心底层是否为 TLS 流
pub struct SmtpSession<S> {
    stream: BufReader<S>,
}

impl<S> SmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream: BufReader::new(stream) }
    }

    /// 完整投递流程: 问候 -> EHLO -> AUTH -> MAIL -> RCPT -> DATA -> QUIT
    pub async fn deliver(&mut self, config: &SmtpConfig, from: &str, msg: &[u8]) -> Result<(), AlertError> {
        self.expect("greeting", &[220]).await?;

        self.command("EHLO localhost").await?;
        self.expect("EHLO", &[250]).await?;

        let token = base64::encode(format!("\0{}\0{}", config.from, config.key));
        self.command(&format!("AUTH PLAIN {}", token)).await?;
        self.expect("AUTH", &[235]).await?;

        self.command(&format!("MAIL FROM:<{}>", config.from)).await?;
        self.expect("MAIL", &[250]).await?;

        for to in &config.to {
            self.command(&format!("RCPT TO:<{}>", to)).await?;
            self.expect("RCPT", &[250, 251]).await?;
        }

        self.command("DATA").await?;
        self.expect("DATA", &[354]).await?;

        let mut data = build_headers(config, from);
        data.extend_from_slice(&encode_body(msg));
        data.extend_from_slice(b".\r\n");
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        self.expect("message", &[250]).await?;

        self.command("QUIT").await?;
        self.expect("QUIT", &[221]).await?;
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<(), AlertError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// 读取一条（可能多行的）应答
    pub async fn read_reply(&mut self) -> Result<Reply, AlertError> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(AlertError::Protocol("连接被服务器关闭".to_string()));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.len() < 3 {
                return Err(AlertError::Protocol(format!("应答过短: {:?}", line)));
            }
            let code: u16 = line
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| AlertError::Protocol(format!("无效的应答码: {:?}", line)))?;

            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line.get(4..).unwrap_or(""));

            // "250-" 表示后续还有行
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(Reply { code, text });
            }
        }
    }

    async fn expect(&mut self, stage: &'static str, codes: &[u16]) -> Result<Reply, AlertError> {
        let reply = self.read_reply().await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(AlertError::Rejected {
                stage,
                reply: format!("{} {}", reply.code, reply.text),
            })
        }
    }
}

/// 手工拼装的邮件头
pub fn build_headers(config: &SmtpConfig, from_name: &str) -> Vec<u8> {
    format!(
        "To: {}\r\nFrom: {}<{}>\r\nSubject: {}\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n",
        config.to.join(","),
        from_name,
        config.from,
        config.subject,
    )
    .into_bytes()
}

/// 正文转为 CRLF 行尾并做点号转义，保证以 CRLF 结尾
pub fn encode_body(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 16);
    let mut line_start = true;
    let mut prev = 0u8;
    for &b in msg {
        if line_start && b == b'.' {
            out.push(b'.');
        }
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        line_start = b == b'\n';
        prev = b;
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn test_config() -> SmtpConfig {
        SmtpConfig {
            from: "alert@example.com".to_string(),
            key: "secret".to_string(),
            host: "smtp.example.com".to_string(),
            port: 465,
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            subject: "告警[logd]".to_string(),
        }
    }

    /// 按脚本应答的假 SMTP 服务器，返回收到的全部内容
    async fn fake_server(stream: DuplexStream, reject_rcpt: bool) -> String {
        let mut server = BufReader::new(stream);
        let mut received = String::new();
        server.write_all(b"220 smtp.example.com ESMTP\r\n").await.unwrap();

        let mut in_data = false;
        loop {
            let mut line = String::new();
            if server.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            received.push_str(&line);

            if in_data {
                if line == ".\r\n" {
                    in_data = false;
                    server.write_all(b"250 queued\r\n").await.unwrap();
                }
                continue;
            }

            let reply: &[u8] = if line.starts_with("EHLO") {
                b"250-smtp.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"
            } else if line.starts_with("AUTH PLAIN") {
                b"235 ok\r\n"
            } else if line.starts_with("MAIL FROM") {
                b"250 ok\r\n"
            } else if line.starts_with("RCPT TO") {
                if reject_rcpt { b"550 no such user\r\n" } else { b"250 ok\r\n" }
            } else if line.starts_with("DATA") {
                in_data = true;
                b"354 go ahead\r\n"
            } else if line.starts_with("QUIT") {
                server.write_all(b"221 bye\r\n").await.unwrap();
                break;
            } else {
                b"500 unknown\r\n"
            };
            server.write_all(reply).await.unwrap();
        }
        received
    }

    #[tokio::test]
    async fn test_session_delivers_message() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false));

        let mut session = SmtpSession::new(client);
        session
            .deliver(&test_config(), "myapp", b"first line\n.hidden\n")
            .await
            .unwrap();
        drop(session);

        let received = server.await.unwrap();
        let token = base64::encode("\0alert@example.com\0secret");
        assert!(received.contains(&format!("AUTH PLAIN {}\r\n", token)));
        assert!(received.contains("MAIL FROM:<alert@example.com>\r\n"));
        assert!(received.contains("RCPT TO:<a@example.com>\r\n"));
        assert!(received.contains("RCPT TO:<b@example.com>\r\n"));
        assert!(received.contains("To: a@example.com,b@example.com\r\n"));
        assert!(received.contains("From: myapp<alert@example.com>\r\n"));
        assert!(received.contains("Content-Type: text/plain; charset=UTF-8\r\n\r\n"));
        assert!(received.contains("first line\r\n..hidden\r\n.\r\n"));
        assert!(received.ends_with("QUIT\r\n"));
    }

    #[tokio::test]
    async fn test_session_recipient_rejected() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, true));

        let mut session = SmtpSession::new(client);
        let err = session.deliver(&test_config(), "myapp", b"boom").await.unwrap_err();
        drop(session);
        let _ = server.await;

        match err {
            AlertError::Rejected { stage, reply } => {
                assert_eq!(stage, "RCPT");
                assert!(reply.starts_with("550"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_read_multiline_reply() {
        let (client, mut server) = duplex(1024);
        server.write_all(b"250-first\r\n250-second\r\n250 last\r\n").await.unwrap();

        let mut session = SmtpSession::new(client);
        let reply = session.read_reply().await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.text, "first\nsecond\nlast");
    }

    #[tokio::test]
    async fn test_invalid_host_is_reported() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "not a host".to_string(),
            ..test_config()
        });
        let err = mailer.send("myapp", b"x").await.unwrap_err();
        assert!(matches!(err, AlertError::InvalidHost(_)));
    }

    #[test]
    fn test_encode_body() {
        assert_eq!(encode_body(b"a\nb"), b"a\r\nb\r\n".to_vec());
        assert_eq!(encode_body(b".x\r\n"), b"..x\r\n".to_vec());
        assert_eq!(encode_body(b""), b"\r\n".to_vec());
    }
}

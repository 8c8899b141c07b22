use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ServiceError;
use crate::service::IssuanceService;

/// Why a connection ended; stable codes for logs and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Served,
    EmptyName,
    NameTooLong,
    ReadFailed,
    WriteFailed,
    IssueFailed,
    WaitTimedOut,
    ShuttingDown,
}

impl ConnectionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Served => "served",
            Self::EmptyName => "empty_name",
            Self::NameTooLong => "name_too_long",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::IssueFailed => "issue_failed",
            Self::WaitTimedOut => "wait_timed_out",
            Self::ShuttingDown => "shutting_down",
        }
    }

    pub fn is_served(self) -> bool {
        self == Self::Served
    }

    fn is_protocol_error(self) -> bool {
        matches!(self, Self::EmptyName | Self::NameTooLong | Self::ReadFailed)
    }
}

enum NameRead {
    Name(String),
    Empty,
    TooLong,
}

/// Read a zero-terminated subject name.
///
/// EOF also ends the name, so a client that half-closes after the
/// terminator (or instead of it) still gets served. Bytes above 0x7F are
/// discarded rather than rejected; `max_name_bytes` bounds memory.
async fn read_subject_name<S>(stream: &mut S, max_name_bytes: usize) -> io::Result<NameRead>
where
    S: AsyncRead + Unpin,
{
    let mut name = Vec::with_capacity(64);
    let mut byte = [0_u8; 1];

    loop {
        let read = stream.read(&mut byte).await?;
        if read == 0 || byte[0] == 0 {
            break;
        }
        if byte[0] > 0x7F {
            continue;
        }
        if name.len() == max_name_bytes {
            return Ok(NameRead::TooLong);
        }
        name.push(byte[0]);
    }

    if name.is_empty() {
        return Ok(NameRead::Empty);
    }
    Ok(NameRead::Name(
        String::from_utf8(name).expect("ASCII-only bytes are valid UTF-8"),
    ))
}

/// Serve one connection: read the name, share or create the pending
/// result, wait for it, write the three PEM blocks. Any failure closes
/// the connection without a response; a partial response is never
/// observable as a complete one.
pub async fn handle_connection<S>(
    service: Arc<IssuanceService>,
    mut stream: S,
) -> ConnectionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = service.metrics_store();
    metrics.record_connection_open();
    let outcome = serve(&service, &mut stream).await;
    metrics.record_connection_close();
    if outcome.is_served() {
        metrics.record_response_served();
    } else if outcome.is_protocol_error() {
        metrics.record_protocol_error();
    }
    outcome
}

async fn serve<S>(service: &IssuanceService, stream: &mut S) -> ConnectionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_name_bytes = service.config().max_name_bytes;
    let subject = match read_subject_name(stream, max_name_bytes).await {
        Ok(NameRead::Name(subject)) => subject,
        Ok(NameRead::Empty) => return ConnectionOutcome::EmptyName,
        Ok(NameRead::TooLong) => {
            tracing::warn!(limit = max_name_bytes, "request name exceeded limit");
            return ConnectionOutcome::NameTooLong;
        }
        Err(error) => {
            tracing::debug!("request read failed: {error}");
            return ConnectionOutcome::ReadFailed;
        }
    };

    let (slot, status) = match service.request(&subject) {
        Ok(admitted) => admitted,
        Err(ServiceError::ShuttingDown) => return ConnectionOutcome::ShuttingDown,
        Err(error) => {
            tracing::warn!(subject = %subject, "request admission failed: {error}");
            return ConnectionOutcome::ShuttingDown;
        }
    };
    tracing::debug!(subject = %subject, cache = status.as_str(), "request admitted");

    let outcome = match service.config().wait_timeout {
        Some(limit) => match tokio::time::timeout(limit, slot.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(subject = %subject, "timed out waiting for credential");
                return ConnectionOutcome::WaitTimedOut;
            }
        },
        None => slot.wait().await,
    };
    let credential = match outcome {
        Ok(credential) => credential,
        Err(failure) => {
            tracing::warn!(
                subject = %subject,
                code = failure.kind.code(),
                "request failed: {failure}"
            );
            return ConnectionOutcome::IssueFailed;
        }
    };

    let response = credential.pem_bundle();
    if let Err(error) = write_response(stream, response.as_bytes()).await {
        tracing::debug!(subject = %subject, "response write failed: {error}");
        return ConnectionOutcome::WriteFailed;
    }
    ConnectionOutcome::Served
}

async fn write_response<S>(stream: &mut S, response: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(response).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::{read_subject_name, NameRead};

    async fn read_all(input: &[u8], limit: usize) -> std::io::Result<NameRead> {
        let mut cursor = std::io::Cursor::new(input.to_vec());
        read_subject_name(&mut cursor, limit).await
    }

    #[tokio::test]
    async fn reads_zero_terminated_name() {
        match read_all(b"alice\0ignored trailing bytes", 4096).await.unwrap() {
            NameRead::Name(name) => assert_eq!(name, "alice"),
            _ => panic!("expected name"),
        }
    }

    #[tokio::test]
    async fn eof_terminates_name_without_zero_byte() {
        match read_all(b"bob", 4096).await.unwrap() {
            NameRead::Name(name) => assert_eq!(name, "bob"),
            _ => panic!("expected name"),
        }
    }

    #[tokio::test]
    async fn bytes_above_ascii_are_discarded() {
        match read_all(b"ali\xFF\xC3ce\0", 4096).await.unwrap() {
            NameRead::Name(name) => assert_eq!(name, "alice"),
            _ => panic!("expected name"),
        }
    }

    #[tokio::test]
    async fn empty_name_is_reported() {
        assert!(matches!(read_all(b"\0", 4096).await.unwrap(), NameRead::Empty));
        assert!(matches!(read_all(b"", 4096).await.unwrap(), NameRead::Empty));
        assert!(matches!(
            read_all(b"\xFF\xFE\0", 4096).await.unwrap(),
            NameRead::Empty
        ));
    }

    #[tokio::test]
    async fn oversized_name_is_rejected() {
        let oversized = vec![b'a'; 10];
        assert!(matches!(
            read_all(&oversized, 9).await.unwrap(),
            NameRead::TooLong
        ));
    }

    #[tokio::test]
    async fn name_at_exact_limit_is_accepted() {
        let mut input = vec![b'a'; 9];
        input.push(0);
        match read_all(&input, 9).await.unwrap() {
            NameRead::Name(name) => assert_eq!(name.len(), 9),
            _ => panic!("expected name"),
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Ec2Error {
    #[error("{code}: {message} (request id: {request_id})")]
    Api { code: String, message: String, request_id: String },
    #[error("unexpected http status {status} {reason}")]
    Http { status: i32, reason: String },
    #[error("can't read <{tag}> value {text:?}")]
    Malformed { tag: String, text: String },
    #[error("{action} failed: {cause}")]
    Operation { action: &'static str, cause: String },
}

use crate::envelope::ResponseKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("remote side disconnected")]
    Disconnected,
    #[error("request was superseded before its response arrived")]
    Superseded,
    #[error("unexpected response payload for {0:?}")]
    UnexpectedResponse(ResponseKind),
    #[error("midi error: {0}")]
    Midi(String),
    #[error("sound bank error: {0}")]
    SoundBank(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("worker error: {0}")]
    Worker(String),
}

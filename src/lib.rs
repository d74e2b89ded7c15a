pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod models;
pub mod parser;
pub mod session;
pub mod tracking;
pub mod unwrap;

pub use config::{Config, PlayerConfig, ResolverConfig};
pub use coordinator::{start_session, MediaPlayer, SessionHandle};
pub use document::{VastDocument, WrapperHandle, WrapperRequest};
pub use error::{Result, VastError};
pub use models::{EventType, ResolvedAd, Tracking};
pub use session::{MediaReady, SessionEvent, SessionSnapshot, SessionState};
pub use tracking::{HttpDispatcher, LoggingDispatcher, TrackingDispatcher};
pub use unwrap::WrapperLoader;

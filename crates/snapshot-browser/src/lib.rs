//! Browser automation collaborators
//!
//! The fetch engine never talks to a browser directly. It depends on two
//! narrow traits:
//!
//! - [`SessionProvider`] opens and closes remote browser sessions
//! - [`PageAutomation`] navigates, locates elements, extracts structured
//!   data and performs actions inside a session
//!
//! [`HttpAutomationClient`] implements both against a remote automation
//! service.

pub mod error;
pub mod http;
pub mod page;
pub mod session;

pub use error::{BrowserError, Result};
pub use http::HttpAutomationClient;
pub use page::{
    ExtractRequest, NavigateOptions, PageAutomation, PageState, UsageSnapshot, WaitUntil,
};
pub use session::{MAX_SESSION_TIMEOUT, SessionHandle, SessionParams, SessionProvider};

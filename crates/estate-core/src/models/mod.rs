//! Data models shared by the cache, interceptor and notification layers.

mod notification;
mod request;
mod response;

pub use notification::{NavigationAction, Notification, NotificationAction};
pub use request::{normalize_url, FetchRequest, RequestKey};
pub use response::{ResponseSnapshot, ResponseSource};

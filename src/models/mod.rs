mod event;
mod link;

pub use event::{AnalyticEvent, DeviceType, NewAnalyticEvent};
pub use link::{Domain, Link, LinkRow, NewLink, Target};

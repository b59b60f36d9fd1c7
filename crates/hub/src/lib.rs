//! 实时连接中心
//!
//! - [`Hub`]: 持有在线客户端集合，注册/注销通过单一控制循环串行化，扇出只持有读锁
//! - [`Client`]: 一个在线连接，拥有有界邮箱、订阅列表和用户范围
//! - [`session::serve`]: 每个连接的收发泵，负责心跳、读截止时间和写超时
//!
//! 投递是尽力而为、至多一次的：邮箱已满的客户端会被立即断开，不做重试或重放。

pub mod client;
pub mod protocol;
pub mod registry;
pub mod session;

pub use client::{Client, Delivery};
pub use protocol::{channels, message_types, ClientControl, ControlAction, ServerMessage};
pub use registry::Hub;
pub use session::{serve, Frame, SessionConfig};

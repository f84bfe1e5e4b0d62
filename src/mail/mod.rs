//! Mail message types handed between the codec and transports.

mod message;

pub use message::{MailMessage, Mailbox, MessageBuilder, MessageError};

pub mod connector;
pub mod message;
pub mod record;

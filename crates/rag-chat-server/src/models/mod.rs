pub mod book;
pub mod chat;
pub mod content;

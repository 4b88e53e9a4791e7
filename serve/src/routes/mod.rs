//! Endpoint families: chat, responses, gigachat, models, health, info.

pub mod chat;
pub mod gigachat;
pub mod health;
pub mod info;
pub mod models;
pub mod responses;

//! Inbox triage: classify incoming email and act on it through mailbox tools.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod tools;
pub mod triage;

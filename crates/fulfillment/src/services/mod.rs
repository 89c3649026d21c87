//! External collaborator traits and their implementations.

pub mod email;
pub mod storage;

pub use email::{
    EmailService, HttpEmailService, InMemoryEmailService, LogEmailService, SentEmail,
    SharedEmailService,
};
pub use storage::{
    Bucket, InMemoryObjectStorage, LocalObjectStorage, ObjectStorage, SharedObjectStorage,
    SignedUrl,
};

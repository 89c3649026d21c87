//! Payment/artwork join and print fulfillment for mug orders.
//!
//! A paid order with uploaded artwork gets exactly one print artifact and one
//! notification, no matter in which order (or how many times) the payment
//! webhook and the artwork upload arrive.
//!
//! - [`ingestion`] authenticates and normalizes payment webhooks.
//! - [`resolver`] maps payment events to orders.
//! - [`engine`] joins the two signals and drives fulfillment.
//! - [`artifact`] renders the print PDF.
//! - [`notify`] sends the order-ready message.
//! - [`intake`] places orders and accepts artwork uploads.

pub mod artifact;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod intake;
pub mod notify;
pub mod resolver;
pub mod services;
pub mod signing;

pub use artifact::{ArtifactGenerator, artifact_path, compose_pdf};
pub use engine::{EngineSettings, PaymentRecorded, ReconcileOutcome, ReconciliationEngine};
pub use error::{FulfillmentError, GenerationError, Result};
pub use ingestion::{PaymentEvent, PaymentSucceeded, WebhookVerifier, signature_header};
pub use intake::{ArtworkIntake, DEFAULT_MAX_UPLOAD_BYTES, PlacedOrder, StoredArtwork};
pub use notify::{DEFAULT_LINK_TTL, NotificationDispatcher};
pub use resolver::{OrderResolver, Resolution, ResolveStrategy};
pub use services::{
    Bucket, EmailService, HttpEmailService, InMemoryEmailService, InMemoryObjectStorage,
    LocalObjectStorage, LogEmailService, ObjectStorage, SharedEmailService, SharedObjectStorage,
    SignedUrl,
};
pub use signing::{UploadTokenSigner, UrlSigner, tokens_match};

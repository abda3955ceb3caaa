#![forbid(unsafe_code)]

pub mod app_services;
pub mod auth;
pub mod config;
pub mod error;
pub mod lesson_service;
pub mod profile_service;
pub mod progress_sync;
pub mod rewards;

pub use quant_core::Clock;

pub use app_services::AppServices;
pub use auth::AuthSession;
pub use config::SyncConfig;
pub use error::{AppServicesError, LessonServiceError, ProfileServiceError, RewardError};
pub use lesson_service::{LessonCompletion, LessonService};
pub use profile_service::ProfileService;
pub use progress_sync::{ProgressSync, SaveOutcome, UserReadySubscription};
pub use rewards::{RewardApplied, RewardLedger};

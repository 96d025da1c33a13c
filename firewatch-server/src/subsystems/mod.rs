pub mod annotate;
pub mod capture;
pub mod notifier;
pub mod overlay;
pub mod queue;
pub mod retention;
pub mod sources;

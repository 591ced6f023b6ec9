mod service;

pub use service::PersistenceScheduler;

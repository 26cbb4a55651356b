mod deployer;
mod memory_store;
mod redis_store;
mod scheduler;
mod store;
mod worker;

pub use {
    deployer::{CommandDeployer, DeployError, Deployer},
    memory_store::MemoryStore,
    redis_store::RedisStore,
    scheduler::{GroupScheduler, StartupPolicy},
    store::QueueStore,
    worker::{AsyncWorker, WorkerConfig},
};

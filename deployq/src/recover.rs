use crate::Queue;
use redis::{Script, ScriptInvocation};

/// Pushes every job left in `processing` by a previous process back onto `ready`.
#[derive(Clone)]
pub struct RecoverAction {
    script: Script,
    queue: Queue,
}

impl RecoverAction {
    pub fn new(queue: Queue) -> Self {
        Self {
            script: Script::new(crate::lua::RECOVER),
            queue,
        }
    }

    pub fn prepare_invoke(&self) -> ScriptInvocation {
        let mut invoke = self.script.prepare_invoke();
        invoke
            .key(self.queue.processing_key.as_str())
            .key(self.queue.ready_key.as_str());
        invoke
    }
}

/// Wipes the store's database on startup.
#[derive(Clone, Default)]
pub struct FlushAction;

impl FlushAction {
    pub fn new() -> Self {
        Self
    }

    pub fn prepare_invoke(&self) -> redis::Cmd {
        redis::cmd("FLUSHDB")
    }
}

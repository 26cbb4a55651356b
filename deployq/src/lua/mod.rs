pub(crate) const ENQUEUE: &str = include_str!("enqueue.lua");
pub(crate) const COMPLETE: &str = include_str!("complete.lua");
pub(crate) const RECOVER: &str = include_str!("recover.lua");

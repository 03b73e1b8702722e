/// Pid of the first process.
pub const INIT_PROC_ID: usize = 1;

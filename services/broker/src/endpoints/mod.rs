// One module per broker endpoint, each an accept loop spawning
// per-connection tasks, plus the heartbeat and maintenance timers.
pub mod egress;
pub mod ingress;
pub mod management;
pub mod peers;
pub mod timers;

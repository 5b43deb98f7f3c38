// Concurrency Manager: two disjoint bounded pools.
// `pipeline` bounds how many whole jobs run at once, each on a private
// single-use async runtime. `data` handles short blocking I/O so async
// stages never stall their reactor.

pub mod data;
pub mod pipeline;

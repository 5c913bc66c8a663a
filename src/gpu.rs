#[path = "gpu_cpu.rs"]
mod gpu_cpu;

#[cfg(feature = "gpu")]
#[path = "gpu_impl.rs"]
mod gpu_impl;
#[cfg(feature = "gpu")]
pub use gpu_impl::probe_device;

#[cfg(not(feature = "gpu"))]
pub use gpu_cpu::probe_device;

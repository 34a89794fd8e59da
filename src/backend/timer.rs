//! Per-stage elapsed time, measured on the host or with GPU timestamps.

use std::{rc::Rc, time::Instant};

use crate::{
    gpu::{command_buffer::CommandBuffer, query::TimestampQueryPool},
    utils::error::SnnError,
};

pub trait DeviceTimer {
    fn name(&self) -> &str;
    fn start(&mut self) -> Result<(), SnnError>;
    fn stop(&mut self) -> Result<(), SnnError>;
    /// Fetch the result of the last start/stop pair. GPU timers need the recorded work
    /// to have completed.
    fn resolve(&mut self) -> Result<(), SnnError>;
    /// Nanoseconds of the last resolved measurement.
    fn duration_ns(&self) -> f64;

    fn duration_ms(&self) -> f64 {
        self.duration_ns() / 1_000_000.0
    }
}

/// Wall-clock timer.
#[derive(Debug)]
pub struct CpuTimer {
    name: String,
    started: Option<Instant>,
    duration_ns: f64,
}

impl CpuTimer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: None,
            duration_ns: 0.0,
        }
    }
}

impl DeviceTimer for CpuTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SnnError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SnnError> {
        if let Some(started) = self.started.take() {
            self.duration_ns = started.elapsed().as_nanos() as f64;
        }
        Ok(())
    }

    fn resolve(&mut self) -> Result<(), SnnError> {
        Ok(())
    }

    fn duration_ns(&self) -> f64 {
        self.duration_ns
    }
}

/// Two timestamps written into the backend's command buffer around a stage.
pub struct GpuTimer {
    name: String,
    pool: TimestampQueryPool,
    command_buffer: Rc<CommandBuffer>,
    pending: bool,
    duration_ns: f64,
}

impl GpuTimer {
    pub fn new(name: impl Into<String>, pool: TimestampQueryPool, command_buffer: Rc<CommandBuffer>) -> Self {
        Self {
            name: name.into(),
            pool,
            command_buffer,
            pending: false,
            duration_ns: 0.0,
        }
    }
}

impl DeviceTimer for GpuTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SnnError> {
        if !self.command_buffer.is_recording() {
            return Err(SnnError::Backend(format!(
                "{}: timer started outside command recording",
                self.name
            )));
        }
        self.command_buffer.reset_query_pool(&self.pool);
        self.command_buffer
            .write_timestamp(&self.pool, TimestampQueryPool::START);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SnnError> {
        if !self.command_buffer.is_recording() {
            return Err(SnnError::Backend(format!(
                "{}: timer stopped outside command recording",
                self.name
            )));
        }
        self.command_buffer
            .write_timestamp(&self.pool, TimestampQueryPool::STOP);
        self.pending = true;
        Ok(())
    }

    fn resolve(&mut self) -> Result<(), SnnError> {
        if self.pending {
            self.duration_ns = self.pool.elapsed_ns()?;
            self.pending = false;
        }
        Ok(())
    }

    fn duration_ns(&self) -> f64 {
        self.duration_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_timer_measures_between_start_and_stop() {
        let mut timer = CpuTimer::new("conv1_4x4x4_2x2x8");
        assert_eq!(timer.duration_ns(), 0.0);

        timer.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        timer.stop().unwrap();
        timer.resolve().unwrap();

        assert!(timer.duration_ms() >= 1.0);
        assert_eq!(timer.name(), "conv1_4x4x4_2x2x8");
    }

    #[test]
    fn stop_without_start_keeps_last_value() {
        let mut timer = CpuTimer::new("idle");
        timer.stop().unwrap();
        assert_eq!(timer.duration_ns(), 0.0);
    }
}

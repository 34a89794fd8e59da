use std::{ptr, sync::Arc};

use vulkanalia::{vk, vk::DeviceV1_0};

use crate::utils::error::SnnError;

use super::context::VulkanDevice;

/// Start/stop timestamp pair around a recorded range of commands.
pub struct TimestampQueryPool {
    pub pool: vk::QueryPool,
    pub count: u32,
    device: Arc<VulkanDevice>,
}

impl TimestampQueryPool {
    pub const START: u32 = 0;
    pub const STOP: u32 = 1;

    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self, SnnError> {
        let count = 2;
        let create_info = vk::QueryPoolCreateInfo {
            s_type: vk::StructureType::QUERY_POOL_CREATE_INFO,
            next: ptr::null(),
            flags: vk::QueryPoolCreateFlags::empty(),
            query_type: vk::QueryType::TIMESTAMP,
            query_count: count,
            pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
        };

        let pool = unsafe { device.device.create_query_pool(&create_info, None)? };

        Ok(Self {
            pool,
            count,
            device: Arc::clone(device),
        })
    }

    /// Raw tick values for every query. Call only after the commands completed.
    pub fn results(&self) -> Result<Vec<u64>, SnnError> {
        let mut data = vec![0u8; self.count as usize * 8];
        unsafe {
            self.device.device.get_query_pool_results(
                self.pool,
                0,
                self.count,
                &mut data,
                8,
                vk::QueryResultFlags::_64 | vk::QueryResultFlags::WAIT,
            )?;
        }

        Ok(data
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// Nanoseconds between the start and stop stamps.
    pub fn elapsed_ns(&self) -> Result<f64, SnnError> {
        let ticks = self.results()?;
        let delta = ticks[Self::STOP as usize].saturating_sub(ticks[Self::START as usize]);
        Ok(delta as f64 * self.device.timestamp_period as f64)
    }
}

impl Drop for TimestampQueryPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_query_pool(self.pool, None);
        }
    }
}

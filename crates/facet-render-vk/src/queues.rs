// SPDX-License-Identifier: CEPL-1.0
use crate::error::{VkError, VkResult};
use ash::vk;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

static QUEUE_PRIORITY: [f32; 1] = [1.0];

/// Family index per role. Several roles may share one family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
    pub present: u32,
}

/// One pass over the families. Graphics takes the first graphics family,
/// compute prefers a family without graphics, transfer one with neither.
/// Present prefers a family no other role took, else the first that can
/// present at all. Unfilled roles share graphics.
pub fn discover(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> VkResult<bool>,
) -> VkResult<QueueFamilies> {
    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;
    let mut presenters = Vec::new();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let flags = family.queue_flags;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = flags.contains(vk::QueueFlags::COMPUTE);

        if has_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if has_compute && !has_graphics && compute.is_none() {
            compute = Some(i);
        }
        if flags.contains(vk::QueueFlags::TRANSFER)
            && !has_graphics
            && !has_compute
            && transfer.is_none()
        {
            transfer = Some(i);
        }
        if supports_present(i)? {
            presenters.push(i);
        }
    }

    let graphics = graphics.ok_or(VkError::NoGraphicsQueue)?;
    let claimed = [Some(graphics), compute, transfer];
    let present = presenters
        .iter()
        .copied()
        .find(|p| !claimed.contains(&Some(*p)))
        .or_else(|| presenters.first().copied())
        .unwrap_or_else(|| {
            warn!("no queue family reports present support; using graphics family {graphics}");
            graphics
        });

    if compute.is_none() {
        debug!("no dedicated compute family; sharing graphics family {graphics}");
    }
    if transfer.is_none() {
        debug!("no dedicated transfer family; sharing graphics family {graphics}");
    }
    if present != graphics {
        info!("presenting from family {present}, separate from graphics family {graphics}");
    }

    Ok(QueueFamilies {
        graphics,
        compute: compute.unwrap_or(graphics),
        transfer: transfer.unwrap_or(graphics),
        present,
    })
}

impl QueueFamilies {
    /// Distinct family indices, ascending.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.compute, self.transfer, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One queue per distinct family, all at priority 1.0.
    pub fn create_infos(&self) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
        self.unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: QUEUE_PRIORITY.as_ptr(),
                ..Default::default()
            })
            .collect()
    }

    /// Families that touch swapchain images; one entry means exclusive
    /// sharing is enough.
    pub fn image_sharing(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Queue handles fetched after device creation, index 0 of each family.
#[derive(Clone, Copy, Debug)]
pub struct Queues {
    pub families: QueueFamilies,
    pub graphics: vk::Queue,
    pub compute: vk::Queue,
    pub transfer: vk::Queue,
    pub present: vk::Queue,
}

impl Queues {
    /// # Safety
    /// `device` must have been created with `families.create_infos()`.
    pub unsafe fn load(device: &ash::Device, families: QueueFamilies) -> Self {
        let get = |family| unsafe { device.get_device_queue(family, 0) };
        Self {
            families,
            graphics: get(families.graphics),
            compute: get(families.compute),
            transfer: get(families.transfer),
            present: get(families.present),
        }
    }
}

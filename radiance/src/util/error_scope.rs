use wgpu::{Device, ErrorFilter};

/// Captures validation and out-of-memory errors raised while creating GPU objects.
///
/// Both filters are pushed on creation and popped in [`ErrorScope::end`], so
/// the first error of either kind is reported instead of reaching the device's
/// uncaptured error handler.
#[must_use = "All error scopes must end in a call to `end`"]
pub struct ErrorScope<'a> {
    device: &'a Device,
    ended: bool,
}

impl<'a> ErrorScope<'a> {
    pub fn new(device: &'a Device) -> Self {
        device.push_error_scope(ErrorFilter::OutOfMemory);
        device.push_error_scope(ErrorFilter::Validation);
        Self { device, ended: false }
    }

    pub fn end(mut self) -> Result<(), wgpu::Error> {
        self.ended = true;
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<'a> Drop for ErrorScope<'a> {
    fn drop(&mut self) {
        if !self.ended {
            log::error!("ErrorScope dropped without calling `end`");
        }
    }
}

//! Virtual output devices via uinput
//!
//! Two synthetic devices stand in for the captured hardware: a pointer that
//! receives the forwarded mouse traffic and a keyboard that receives both
//! the physical keyboard stream and the remapped side-button events. Both
//! advertise the captured hardware's USB ids so the rest of the input stack
//! treats them like the real devices.
//!
//! The evdev uinput handle is non-blocking, so a full kernel-side buffer
//! surfaces as a write error rather than stalling a worker.

use anyhow::{Context, Result};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, BusType, InputEvent, InputId, Key, MiscType, RelativeAxisType};

use sidekey_config::DeviceMatch;

/// Destination for translated events. Implemented by the real uinput
/// devices and by capturing fakes in worker tests.
pub trait EventSink {
    fn write_event(&mut self, event: InputEvent) -> std::io::Result<()>;
}

pub struct VirtualOutput {
    device: VirtualDevice,
}

impl EventSink for VirtualOutput {
    fn write_event(&mut self, event: InputEvent) -> std::io::Result<()> {
        self.device.emit(&[event])
    }
}

/// Create the virtual pointer device.
///
/// The capability set covers everything the router can send here: the
/// standard buttons plus side/extra, relative motion and wheels, and
/// MSC_SCAN for pass-through scan codes.
pub fn create_pointer(name: &str, id: DeviceMatch) -> Result<VirtualOutput> {
    let mut keys = AttributeSet::<Key>::new();
    for key in [
        Key::BTN_LEFT,
        Key::BTN_RIGHT,
        Key::BTN_MIDDLE,
        Key::BTN_SIDE,
        Key::BTN_EXTRA,
    ] {
        keys.insert(key);
    }

    let mut axes = AttributeSet::<RelativeAxisType>::new();
    for axis in [
        RelativeAxisType::REL_X,
        RelativeAxisType::REL_Y,
        RelativeAxisType::REL_WHEEL,
        RelativeAxisType::REL_HWHEEL,
    ] {
        axes.insert(axis);
    }

    let mut misc = AttributeSet::<MiscType>::new();
    misc.insert(MiscType::MSC_SCAN);

    let device = VirtualDeviceBuilder::new()
        .context("failed to open /dev/uinput")?
        .name(name)
        .input_id(InputId::new(BusType::BUS_USB, id.vendor, id.product, 1))
        .with_keys(&keys)
        .context("failed to set virtual pointer key capabilities")?
        .with_relative_axes(&axes)
        .context("failed to set virtual pointer relative-axis capabilities")?
        .with_msc(&misc)
        .context("failed to set virtual pointer MSC capabilities")?
        .build()
        .context("failed to create virtual pointer device")?;

    Ok(VirtualOutput { device })
}

/// Create the virtual keyboard device with all standard key codes plus
/// MSC_SCAN, so any key the physical keyboard produces can be re-emitted.
pub fn create_keyboard(name: &str, id: DeviceMatch) -> Result<VirtualOutput> {
    let mut keys = AttributeSet::<Key>::new();
    for code in 0..256u16 {
        keys.insert(Key::new(code));
    }

    let mut misc = AttributeSet::<MiscType>::new();
    misc.insert(MiscType::MSC_SCAN);

    let device = VirtualDeviceBuilder::new()
        .context("failed to open /dev/uinput")?
        .name(name)
        .input_id(InputId::new(BusType::BUS_USB, id.vendor, id.product, 1))
        .with_keys(&keys)
        .context("failed to set virtual keyboard key capabilities")?
        .with_msc(&misc)
        .context("failed to set virtual keyboard MSC capabilities")?
        .build()
        .context("failed to create virtual keyboard device")?;

    Ok(VirtualOutput { device })
}

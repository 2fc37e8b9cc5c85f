/*!
# floppyemu

Floppy disk subsystem emulation for vintage machine emulators: drive
mechanics, a family of disk image codecs and an Intel 8271 controller
running on a virtual microsecond clock.

## Features

- Drive mechanics: head stepping, motor, index pulse timing and Apple, Sony
  and 1541 stepper schemes
- Image codecs behind one trait: headerless sector dumps, CPC DSK and
  Extended DSK, D88/D77, D64/D71, G64, MFM_DISK, Teledisk TD0 and ImageDisk IMD
- Format identification by content with confidence scores
- Intel 8271 command processor driven through its host registers
- A deterministic event clock shared by index pulses and controller timers

## Quick Start

```rust,no_run
use floppyemu::{FloppySystem, SystemConfig, FormatRegistry, read_image};

let registry = FormatRegistry::standard();
let image = read_image("games.ssd", &registry)?;

let mut system = FloppySystem::new(SystemConfig::bbc_micro());
system.insert(0, image)?;

// load head on drive 0, then READ DATA track 0 sector 0
system.write_register(0, 0x7A);
system.write_register(1, 0x23);
system.write_register(1, 0x08);
system.write_register(0, 0x52);
system.write_register(1, 0);
system.write_register(1, 0);

let mut sector = Vec::new();
loop {
    let lines = system.run_until_request(system.now() + 1_000_000);
    if !lines.drq {
        break;
    }
    sector.push(system.read_data());
}
let result = system.read_register(1);
println!("{} bytes, result {:02X}", sector.len(), result);
# Ok::<(), floppyemu::FloppyError>(())
```

## Modules

- `clock`: virtual microsecond clock and timers
- `image`: the `ImageCodec` trait and sector types
- `format`: container codecs and the format registry
- `drive`: drive mechanics and the drive/image binding
- `controller`: the i8271 controller
- `system`: drives, controller and clock wired together
- `io`: reading and writing image files
- `map`: sector map rendering
- `error`: error types and Result alias
*/

#![warn(missing_docs)]

/// Virtual microsecond clock
pub mod clock;
/// Floppy disk controllers
pub mod controller;
/// Drive mechanics
pub mod drive;
/// Error types and Result alias
pub mod error;
/// Disk image container formats
pub mod format;
/// Core image abstraction
pub mod image;
/// I/O operations for reading and writing image files
pub mod io;
/// Sector map visualization
pub mod map;
/// Drives, controller and clock wired together
pub mod system;

// Re-export common types
pub use clock::{Micros, TimerId, VirtualClock};
pub use controller::{Command, Effect, Effects, FdcTimer, Phase, I8271};
pub use drive::{
    Density, Drive, DriveConfig, DriveFlags, DriveImageBinding, DriveTable, DriveType,
};
pub use error::{FloppyError, Result};
pub use format::{
    BasicDsk, BasicDskGeometry, D64Image, D88Image, DskImage, DskVariant, FormatDescriptor,
    FormatRegistry, G64Image, ImdImage, MfmDisk, Td0Image,
};
pub use image::{Geometry, ImageBuilder, ImageCodec, SectorFlags, SectorId, SectorInfo};
pub use io::{read_image, read_image_as, save_image, write_image};
pub use map::render_sector_map;
pub use system::{FloppySystem, HostLines, SystemConfig, SystemEvent};

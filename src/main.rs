// SPDX-License-Identifier: MIT OR Apache-2.0

//! UEFI entry point for the measured-boot agent.
//!
//! Order matters: the interface is negotiated once, then the boot
//! configuration, kernel, and initrd are measured into PCR 8, in that
//! order. Any failure exits with that stage's status so the firmware can
//! treat the boot path as untrustworthy.

#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]

#[cfg(target_os = "uefi")]
mod agent {
    use log::{error, info};
    use measured_boot::MeasureError;
    use measured_boot::measure::{BootMeasurement, BootVolume};
    use measured_boot::tcg::Tcg;
    use uefi::boot::{self, ScopedProtocol};
    use uefi::fs::FileSystem;
    use uefi::prelude::*;
    use uefi::proto::loaded_image::LoadedImage;

    /// Locate and exclusively open the TCG measurement protocol.
    fn open_measurement_interface() -> Result<ScopedProtocol<Tcg>, MeasureError> {
        let handle = boot::get_handle_for_protocol::<Tcg>()
            .map_err(|_| MeasureError::InterfaceNotFound)?;
        boot::open_protocol_exclusive::<Tcg>(handle).map_err(|_| MeasureError::InterfaceNotFound)
    }

    fn report_loaded_image() {
        if let Ok(image) = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle()) {
            let (base, size) = image.info();
            info!("loaded at {base:p}, {size} bytes");
        }
    }

    fn fail(err: MeasureError) -> Status {
        error!("boot measurement failed: {err}");
        err.status()
    }

    #[entry]
    fn main() -> Status {
        if uefi::helpers::init().is_err() {
            return Status::ABORTED;
        }

        report_loaded_image();

        let mut tcg = match open_measurement_interface() {
            Ok(tcg) => tcg,
            Err(err) => return fail(err),
        };

        let fs = match boot::get_image_file_system(boot::image_handle()) {
            Ok(sfs) => FileSystem::new(sfs),
            Err(err) => {
                error!("opening the boot volume failed: {err:?}");
                return Status::LOAD_ERROR;
            }
        };
        let mut volume = BootVolume::new(fs);

        match BootMeasurement::new(&mut *tcg, &mut volume).run() {
            Ok(()) => {
                info!("boot chain measured, continuing boot");
                Status::SUCCESS
            }
            Err(err) => fail(err),
        }
    }
}

/// Host stub so the package builds (and the library tests run) off
/// target.
#[cfg(not(target_os = "uefi"))]
fn main() {}

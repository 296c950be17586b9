// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_num::maybe_hex;
use owo_colors::OwoColorize;

use qflash::engine::ProtocolEngine;
use qflash::transport::Transport;
use qflash::types::PatchMethod;

mod util;

use util::{find_part, print_partition_table};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Usb,
    Mock,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    Magisk,
    KernelSu,
    Custom,
}

impl From<Method> for PatchMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Magisk => PatchMethod::Magisk,
            Method::KernelSu => PatchMethod::KernelSu,
            Method::Custom => PatchMethod::Custom,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the device and report which protocol family it speaks.
    Identify,

    /// Print the partition table.
    Partitions,

    /// Dump a single partition to a file.
    Dump {
        name: String,
        #[arg(default_value = "out.bin")]
        out_path: String,
    },

    /// Overwrite a partition with the contents of a file.
    Flash { name: String, file: String },

    /// Erase a partition outright.
    Erase { name: String },

    /// Unpack a boot image, hand its ramdisk to a patch method, repack.
    PatchBoot {
        input: String,
        output: String,
        #[arg(value_enum)]
        method: Method,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Which transport to drive partition operations over. `mock` has
    /// no associated hardware and only exists for test harnesses.
    #[arg(long, value_enum, default_value = "usb")]
    backend: Backend,

    /// Restrict USB enumeration to a device with this serial number.
    #[arg(long)]
    serial_no: Option<String>,

    /// Firehose programmer binary to upload over Sahara, for Qualcomm
    /// devices. Required unless the attached device turns out to be
    /// MediaTek.
    #[arg(long, value_name = "FILE")]
    loader_path: Option<String>,

    /// Download Agent binary to upload over BROM, for MediaTek devices.
    /// Required unless the attached device turns out to be Qualcomm.
    #[arg(long, value_name = "FILE")]
    da_path: Option<String>,

    /// Load address to upload the Download Agent at.
    #[arg(long, value_parser = maybe_hex::<u32>, default_value = "0x40000000")]
    da_load_addr: u32,

    #[command(subcommand)]
    command: Command,
}

/// Open a USB transport matching whichever protocol family is actually
/// attached: try Qualcomm EDL first, then MediaTek BROM.
fn open_transport(args: &Args) -> Result<Box<dyn Transport>> {
    match args.backend {
        Backend::Mock => {
            bail!("the mock backend has no associated hardware; it exists for test harnesses only")
        }
        Backend::Usb => {
            let serial = args.serial_no.as_deref();
            if let Ok(t) = qflash::usb::open_edl(serial) {
                return Ok(Box::new(t));
            }
            let t = qflash::usb::open_brom(serial)
                .context("found no Qualcomm EDL or MediaTek BROM device")?;
            Ok(Box::new(t))
        }
    }
}

/// Open a transport, identify it, and -- if a protocol-specific
/// programmer/DA was given -- complete the handshake so partition
/// operations are usable. Returns the open transport and engine.
fn connect(args: &Args) -> Result<(Box<dyn Transport>, ProtocolEngine)> {
    let mut transport = open_transport(args)?;
    let mut engine = ProtocolEngine::new();

    if !engine.identify(transport.as_mut())? {
        bail!("device did not respond to either the BROM or Sahara handshake");
    }

    match engine.kind() {
        Some(qflash::ProtocolKind::Qualcomm) => {
            let loader_path = args
                .loader_path
                .as_ref()
                .context("device is Qualcomm EDL; pass --loader-path <programmer.mbn>")?;
            let programmer = std::fs::read(loader_path)
                .with_context(|| format!("couldn't read programmer at {loader_path}"))?;
            engine.load_qualcomm_programmer(transport.as_mut(), &programmer)?;
            println!("{}", "Identified Qualcomm EDL device".green());
        }
        Some(qflash::ProtocolKind::MediaTek) => {
            let da_path = args
                .da_path
                .as_ref()
                .context("device is MediaTek BROM; pass --da-path <da.bin>")?;
            let da_image = std::fs::read(da_path)
                .with_context(|| format!("couldn't read DA image at {da_path}"))?;
            engine.load_mediatek_da(transport.as_mut(), &da_image, Some(args.da_load_addr))?;
            println!("{}", "Identified MediaTek BROM device".green());
        }
        None => unreachable!("identify() returned true but left the session unidentified"),
    }

    Ok((transport, engine))
}

fn run() -> Result<()> {
    let args = Args::parse();

    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").green(),
        env!("CARGO_PKG_VERSION").yellow()
    );

    // patch-boot is pure local file manipulation; it never touches a device.
    if let Command::PatchBoot {
        input,
        output,
        method,
    } = &args.command
    {
        struct PassthroughPatcher;
        impl qflash::patcher::RamdiskPatcher for PassthroughPatcher {
            fn patch_ramdisk(
                &self,
                ramdisk: &[u8],
                _method: PatchMethod,
            ) -> qflash::Result<Vec<u8>> {
                Ok(ramdisk.to_vec())
            }
        }
        println!(
            "{}",
            "no ramdisk-patching collaborator is linked in; repacking unmodified".bright_black()
        );
        qflash::patcher::patch(input, output, (*method).into(), &PassthroughPatcher)?;
        println!("{}", format!("wrote {output}").green());
        return Ok(());
    }

    let (mut transport, mut engine) = connect(&args)?;

    match &args.command {
        Command::Identify => {
            println!(
                "{}: {:?}",
                "protocol".bright_black(),
                engine.kind().expect("connect() always identifies")
            );
        }
        Command::Partitions => {
            let partitions = engine.get_partitions(transport.as_mut())?;
            print_partition_table(partitions);
        }
        Command::Dump { name, out_path } => {
            engine.get_partitions(transport.as_mut())?;
            let data = engine.dump_partition(transport.as_mut(), name)?;
            std::fs::write(out_path, &data)
                .with_context(|| format!("couldn't write {out_path}"))?;
            println!(
                "{}",
                format!("dumped {name} ({} KB) to {out_path}", data.len() / 1024).green()
            );
        }
        Command::Flash { name, file } => {
            engine.get_partitions(transport.as_mut())?;
            let data = std::fs::read(file).with_context(|| format!("couldn't read {file}"))?;
            if qflash::sparse::is_sparse(&data) {
                println!(
                    "{}",
                    format!(
                        "warning: {file} looks like an Android sparse image ({} bytes unsparsed); \
                         this tool does not dechunk it before flashing",
                        qflash::sparse::unsparsed_size(&data)
                    )
                    .yellow()
                );
            }
            engine.flash_partition(transport.as_mut(), name, &data)?;
            println!("{}", format!("flashed {file} to {name}").green());
        }
        Command::Erase { name } => {
            let partitions = engine.get_partitions(transport.as_mut())?;
            find_part(partitions, name).with_context(|| format!("no such partition: {name}"))?;
            engine.erase_partition(transport.as_mut(), name)?;
            println!("{}", format!("erased {name}").green());
        }
        Command::PatchBoot { .. } => unreachable!("handled above"),
    }

    transport.close()?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", format!("[ERROR] {e:#}").bright_red());
        std::process::exit(1);
    }
}

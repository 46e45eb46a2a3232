use std::{
    ffi::CString,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, ensure, Context, Result};
use aya::pin::PinError;
use aya::programs::tc::{self, SchedClassifier, SchedClassifierLinkId, TcAttachType};
use aya::{include_bytes_aligned, maps::HashMap as BpfHashMap, Ebpf};
use aya_log::EbpfLogger;
use tokio::signal;

use podnet_common::{DeviceRecord, DeviceRole};

const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/podnet"));

pub const MAP_LOCAL_ENDPOINTS: &str = "local_endpoints";
pub const MAP_REMOTE_PODS: &str = "remote_pods";
pub const MAP_OVERLAY_DEVICES: &str = "overlay_devices";

const VETH_PROGRAM: &str = "veth_ingress";
const VXLAN_EGRESS_PROGRAM: &str = "vxlan_egress";
const VXLAN_INGRESS_PROGRAM: &str = "vxlan_ingress";

pub const DEFAULT_BPF_DIR: &str = "/sys/fs/bpf/podnet";

#[derive(Clone, Debug)]
pub struct AttachOptions {
    /// Host-side veth interfaces to classify on ingress.
    pub veth_ifaces: Vec<String>,
    /// The node's VXLAN device; gets the egress and ingress classifiers.
    pub vxlan_iface: String,
    /// Directory under bpffs where the three tables are pinned for the
    /// control plane.
    pub bpf_dir: PathBuf,
}

/// Load the classifiers, pin the tables, attach to every requested device
/// and block until Ctrl+C, then detach.
pub async fn attach(opts: AttachOptions) -> Result<()> {
    ensure!(
        !opts.veth_ifaces.is_empty(),
        "at least one veth interface is required"
    );

    let mut bpf = Ebpf::load(EBPF_BYTES).context("failed to load eBPF object")?;

    if let Err(err) = EbpfLogger::init(&mut bpf) {
        eprintln!("failed to initialize eBPF logger: {err}");
    }

    pin_map(&mut bpf, MAP_LOCAL_ENDPOINTS, &opts.bpf_dir)?;
    pin_map(&mut bpf, MAP_REMOTE_PODS, &opts.bpf_dir)?;
    pin_map(&mut bpf, MAP_OVERLAY_DEVICES, &opts.bpf_dir)?;

    register_vxlan_device(&mut bpf, &opts.vxlan_iface)?;

    let mut links = Vec::new();

    load_program(&mut bpf, VETH_PROGRAM)?;
    for iface in &opts.veth_ifaces {
        ensure_clsact(iface)?;
        let id = attach_tc(&mut bpf, VETH_PROGRAM, iface, TcAttachType::Ingress)?;
        links.push((VETH_PROGRAM, id));
        println!("Attached {VETH_PROGRAM} to {iface} ingress.");
    }

    ensure_clsact(&opts.vxlan_iface)?;
    load_program(&mut bpf, VXLAN_EGRESS_PROGRAM)?;
    let id = attach_tc(
        &mut bpf,
        VXLAN_EGRESS_PROGRAM,
        &opts.vxlan_iface,
        TcAttachType::Egress,
    )?;
    links.push((VXLAN_EGRESS_PROGRAM, id));

    load_program(&mut bpf, VXLAN_INGRESS_PROGRAM)?;
    let id = attach_tc(
        &mut bpf,
        VXLAN_INGRESS_PROGRAM,
        &opts.vxlan_iface,
        TcAttachType::Ingress,
    )?;
    links.push((VXLAN_INGRESS_PROGRAM, id));
    println!(
        "Attached tunnel classifiers to {}. Press Ctrl+C to detach.",
        opts.vxlan_iface
    );

    signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    println!("Detaching...");
    for (program, id) in links {
        detach_tc(&mut bpf, program, id)?;
    }
    Ok(())
}

/// Resolve an interface name to its kernel ifindex.
pub fn ifindex(name: &str) -> Result<u32> {
    let ifname = CString::new(name).context("interface name contains NUL")?;
    let index = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
    ensure!(index != 0, "interface {name} not found");
    Ok(index)
}

fn register_vxlan_device(bpf: &mut Ebpf, iface: &str) -> Result<()> {
    let index = ifindex(iface)?;
    let map = bpf
        .map_mut(MAP_OVERLAY_DEVICES)
        .with_context(|| format!("map {MAP_OVERLAY_DEVICES} not found"))?;
    let mut devices: BpfHashMap<_, u32, DeviceRecord> =
        BpfHashMap::try_from(map).context("device map has unexpected type")?;
    devices
        .insert(DeviceRole::Vxlan as u32, DeviceRecord { ifindex: index }, 0)
        .with_context(|| format!("failed to register vxlan device {iface}"))?;
    Ok(())
}

fn pin_map(bpf: &mut Ebpf, map_name: &str, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(map_name);
    let map = bpf
        .map_mut(map_name)
        .with_context(|| format!("map {map_name} not found"))?;
    match map.pin(&path) {
        Ok(()) => Ok(()),
        Err(PinError::SyscallError(err)) if err.io_error.kind() == io::ErrorKind::AlreadyExists => {
            Ok(())
        }
        Err(err) => Err(anyhow!(
            "failed to pin map {map_name} at {}: {err}",
            path.display()
        )),
    }
}

fn ensure_clsact(iface: &str) -> Result<()> {
    match tc::qdisc_add_clsact(iface) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(anyhow!("failed to add clsact qdisc on {iface}: {err}")),
    }
}

fn load_program(bpf: &mut Ebpf, program: &str) -> Result<()> {
    classifier_mut(bpf, program)?
        .load()
        .with_context(|| format!("failed to load {program}"))
}

fn attach_tc(
    bpf: &mut Ebpf,
    program: &str,
    iface: &str,
    attach_type: TcAttachType,
) -> Result<SchedClassifierLinkId> {
    classifier_mut(bpf, program)?
        .attach(iface, attach_type)
        .with_context(|| format!("failed to attach {program} on {iface}"))
}

fn detach_tc(bpf: &mut Ebpf, program: &str, id: SchedClassifierLinkId) -> Result<()> {
    classifier_mut(bpf, program)?
        .detach(id)
        .with_context(|| format!("failed to detach {program}"))
}

fn classifier_mut<'a>(bpf: &'a mut Ebpf, program: &str) -> Result<&'a mut SchedClassifier> {
    bpf.program_mut(program)
        .with_context(|| format!("program {program} not found"))?
        .try_into()
        .context("tc program has wrong type")
}

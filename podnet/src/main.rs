use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use podnet_common::DeviceRole;

mod loader;
mod tables;

#[derive(Parser)]
#[command(name = "podnet")]
#[command(about = "Container overlay dataplane: loader and table control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the classifiers, pin the tables and attach to the overlay devices
    Attach(AttachCommand),
    /// Manage the local endpoint table
    #[command(subcommand)]
    LocalEndpoints(LocalEndpointsCommand),
    /// Manage the remote pod table
    #[command(subcommand)]
    RemotePods(RemotePodsCommand),
    /// Manage the device registry
    #[command(subcommand)]
    Devices(DevicesCommand),
}

#[derive(Args)]
struct AttachCommand {
    /// Host-side veth interface for a pod (repeatable)
    #[arg(long = "veth", value_name = "IFACE", required = true)]
    veth_ifaces: Vec<String>,
    /// The node's VXLAN tunnel device
    #[arg(long = "vxlan", value_name = "IFACE")]
    vxlan_iface: String,
    /// Directory under bpffs where the tables are pinned
    #[arg(long, value_name = "DIR", default_value = loader::DEFAULT_BPF_DIR)]
    bpf_dir: PathBuf,
}

#[derive(Args)]
struct TableArgs {
    /// Directory under bpffs where the tables are pinned
    #[arg(long, value_name = "DIR", default_value = loader::DEFAULT_BPF_DIR)]
    bpf_dir: PathBuf,
}

#[derive(Subcommand)]
enum LocalEndpointsCommand {
    /// Print all local endpoint records as JSON
    List(TableArgs),
    /// Create or replace the record for a pod hosted on this node
    Set {
        #[command(flatten)]
        table: TableArgs,
        /// The pod's overlay IPv4 address
        #[arg(long)]
        pod_ip: Ipv4Addr,
        /// ifindex of the container-side veth peer
        #[arg(long)]
        peer_ifindex: u32,
        /// MAC of the pod's interface (aa:bb:cc:dd:ee:ff)
        #[arg(long)]
        pod_mac: String,
        /// MAC of the host-side veth peer
        #[arg(long)]
        host_mac: String,
    },
    /// Remove a pod's record on teardown
    Delete {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long)]
        pod_ip: Ipv4Addr,
    },
}

#[derive(Subcommand)]
enum RemotePodsCommand {
    /// Print all remote pod records as JSON
    List(TableArgs),
    /// Record which node hosts a remote pod
    Set {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long)]
        pod_ip: Ipv4Addr,
        /// IPv4 address of the hosting node
        #[arg(long)]
        node_ip: Ipv4Addr,
    },
    /// Remove a remote pod record
    Delete {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long)]
        pod_ip: Ipv4Addr,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum RoleArg {
    Vxlan,
    Veth,
}

impl From<RoleArg> for DeviceRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Vxlan => DeviceRole::Vxlan,
            RoleArg::Veth => DeviceRole::Veth,
        }
    }
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// Print the device registry as JSON
    List(TableArgs),
    /// Register a device role
    Set {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, value_enum)]
        role: RoleArg,
        /// Interface name to resolve on this node
        #[arg(long, value_name = "IFACE", conflicts_with = "ifindex")]
        iface: Option<String>,
        /// Kernel interface index, if already known
        #[arg(long)]
        ifindex: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("podnet error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Attach(cmd)) => {
            loader::attach(loader::AttachOptions {
                veth_ifaces: cmd.veth_ifaces,
                vxlan_iface: cmd.vxlan_iface,
                bpf_dir: cmd.bpf_dir,
            })
            .await?;
        }
        Some(Commands::LocalEndpoints(cmd)) => match cmd {
            LocalEndpointsCommand::List(table) => {
                print_json(&tables::list_local_endpoints(&table.bpf_dir)?)?;
            }
            LocalEndpointsCommand::Set {
                table,
                pod_ip,
                peer_ifindex,
                pod_mac,
                host_mac,
            } => {
                let pod_mac = tables::parse_mac(&pod_mac)?;
                let host_mac = tables::parse_mac(&host_mac)?;
                tables::set_local_endpoint(&table.bpf_dir, pod_ip, peer_ifindex, pod_mac, host_mac)?;
            }
            LocalEndpointsCommand::Delete { table, pod_ip } => {
                tables::delete_local_endpoint(&table.bpf_dir, pod_ip)?;
            }
        },
        Some(Commands::RemotePods(cmd)) => match cmd {
            RemotePodsCommand::List(table) => {
                print_json(&tables::list_remote_pods(&table.bpf_dir)?)?;
            }
            RemotePodsCommand::Set {
                table,
                pod_ip,
                node_ip,
            } => {
                tables::set_remote_pod(&table.bpf_dir, pod_ip, node_ip)?;
            }
            RemotePodsCommand::Delete { table, pod_ip } => {
                tables::delete_remote_pod(&table.bpf_dir, pod_ip)?;
            }
        },
        Some(Commands::Devices(cmd)) => match cmd {
            DevicesCommand::List(table) => {
                print_json(&tables::list_devices(&table.bpf_dir)?)?;
            }
            DevicesCommand::Set {
                table,
                role,
                iface,
                ifindex,
            } => {
                let index = match (iface, ifindex) {
                    (Some(name), None) => loader::ifindex(&name)?,
                    (None, Some(index)) => index,
                    _ => return Err(anyhow!("exactly one of --iface or --ifindex is required")),
                };
                tables::set_device(&table.bpf_dir, role.into(), index)?;
            }
        },
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

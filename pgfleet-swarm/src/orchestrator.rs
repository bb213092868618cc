//! Turns a [`DatabaseSpec`] into the desired resource state of one database.

use pgfleet_resource::{Error, NodeResolver, Result, State, from_state};

use crate::collaborators::Collaborators;
use crate::ipam::SubnetRangeSpec;
use crate::resources::{
    CheckWillRestart, Dir, EtcdCreds, Instance, Network, Node, PatroniCluster, PatroniConfig,
    PatroniMember, PgBackRestConfig, PgBackRestStanza, PostgresCerts, PostgresService,
    PostgresServiceSpec, ScaleDirection, ScaleService, Switchover, instance_hostname,
    instance_identifier, node_identifier,
};
use crate::spec::{DatabaseSpec, InstanceConfig};

#[derive(Debug, Clone)]
pub struct DesiredStateOptions {
    /// Pool database networks are carved from.
    pub subnet: SubnetRangeSpec,
    /// Scale every instance's service up or down as part of the pass.
    pub scale: Option<ScaleDirection>,
}

impl DesiredStateOptions {
    pub fn new(subnet: SubnetRangeSpec) -> Self {
        Self {
            subnet,
            scale: None,
        }
    }

    pub fn with_scale(mut self, direction: ScaleDirection) -> Self {
        self.scale = Some(direction);
        self
    }
}

/// Directory IDs of one instance.
struct InstanceDirs {
    root: String,
    data: String,
    configs: String,
    certificates: String,
}

impl InstanceDirs {
    fn new(instance_id: &str) -> Self {
        Self {
            root: instance_id.to_string(),
            data: format!("{}-data", instance_id),
            configs: format!("{}-configs", instance_id),
            certificates: format!("{}-certificates", instance_id),
        }
    }
}

/// Build the full desired state of a database. Fails with every validation
/// problem of the spec at once.
pub fn desired_state(spec: &DatabaseSpec, options: &DesiredStateOptions) -> Result<State> {
    spec.validate()?;

    let mut state = State::new();
    add(
        &mut state,
        &Network::new(&spec.cohort_id, &spec.database_id, options.subnet),
    )?;

    for config in spec.instances() {
        add_instance(&mut state, &config, options)?;
    }

    for node in &spec.nodes {
        add(
            &mut state,
            &PatroniCluster {
                cluster_id: spec.cluster_id.clone(),
                database_id: spec.database_id.clone(),
                node_name: node.name.clone(),
            },
        )?;
        add(
            &mut state,
            &Node {
                cluster_id: spec.cluster_id.clone(),
                database_id: spec.database_id.clone(),
                name: node.name.clone(),
                instance_ids: node
                    .instances
                    .iter()
                    .map(|instance| instance.instance_id.clone())
                    .collect(),
                primary_instance_id: None,
            },
        )?;
        if spec.backup.is_some() {
            add(
                &mut state,
                &PgBackRestStanza {
                    database_id: spec.database_id.clone(),
                    node_name: node.name.clone(),
                },
            )?;
        }
    }

    Ok(state)
}

fn add_instance(state: &mut State, config: &InstanceConfig, options: &DesiredStateOptions) -> Result<()> {
    let iid = config.instance_id.as_str();
    let host = config.host_id.as_str();
    let (uid, gid) = (config.owner_uid, config.owner_gid);
    let dirs = InstanceDirs::new(iid);

    add(state, &Dir::new(&dirs.root, host, None, iid).with_owner(uid, gid))?;
    for (id, path) in [
        (&dirs.data, "data"),
        (&dirs.configs, "configs"),
        (&dirs.certificates, "certificates"),
    ] {
        add(state, &Dir::new(id, host, Some(&dirs.root), path).with_owner(uid, gid))?;
    }

    add(
        state,
        &EtcdCreds {
            instance_id: iid.to_string(),
            database_id: config.database_id.clone(),
            host_id: host.to_string(),
            node_name: config.node_name.clone(),
            parent_id: dirs.certificates.clone(),
            owner_uid: uid,
            owner_gid: gid,
            username: String::new(),
            password: String::new(),
            ca_cert: String::new(),
            client_cert: String::new(),
            client_key: String::new(),
        },
    )?;
    add(
        state,
        &PostgresCerts {
            instance_id: iid.to_string(),
            database_id: config.database_id.clone(),
            host_id: host.to_string(),
            instance_hostname: instance_hostname(iid),
            parent_id: dirs.certificates.clone(),
            owner_uid: uid,
            owner_gid: gid,
            ca_cert: String::new(),
            server_cert: String::new(),
            server_key: String::new(),
            superuser_cert: String::new(),
            superuser_key: String::new(),
            replication_cert: String::new(),
            replication_key: String::new(),
        },
    )?;

    add(
        state,
        &PatroniMember {
            cluster_id: config.cluster_id.clone(),
            database_id: config.database_id.clone(),
            node_name: config.node_name.clone(),
            instance_id: iid.to_string(),
        },
    )?;
    add(
        state,
        &PatroniConfig {
            config: config.clone(),
            parent_id: dirs.configs.clone(),
        },
    )?;
    if config.backup.is_some() {
        add(
            state,
            &PgBackRestConfig {
                config: config.clone(),
                parent_id: dirs.configs.clone(),
            },
        )?;
    }

    add(
        state,
        &PostgresServiceSpec {
            config: config.clone(),
            data_dir_id: dirs.data.clone(),
            configs_dir_id: dirs.configs.clone(),
            certs_dir_id: dirs.certificates.clone(),
            spec: None,
        },
    )?;
    add(state, &CheckWillRestart::new(iid, &config.cohort_id))?;
    add(state, &Switchover::new(host, iid))?;
    add(state, &PostgresService::new(iid, &config.cohort_id))?;
    add(state, &Instance::new(config.clone()))?;

    if let Some(direction) = options.scale {
        add(
            state,
            &ScaleService {
                instance_id: iid.to_string(),
                cohort_id: config.cohort_id.clone(),
                direction,
            },
        )?;
    }
    Ok(())
}

fn add<R: pgfleet_resource::Resource<Collaborators>>(state: &mut State, resource: &R) -> Result<()> {
    state.add_resource::<Collaborators, R>(resource)
}

/// Resolves node executors to the host of the node's current primary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwarmNodeResolver;

impl NodeResolver for SwarmNodeResolver {
    fn primary_host(&self, state: &State, node_name: &str) -> Result<String> {
        let node: Node = from_state(state, &node_identifier(node_name))
            .map_err(|_| Error::ExecutorNotFound(format!("node {} is not in state", node_name)))?;
        let primary = node.primary_instance_id.ok_or_else(|| {
            Error::ExecutorNotFound(format!("node {} has no primary instance", node_name))
        })?;
        let instance: Instance = from_state(state, &instance_identifier(&primary)).map_err(|_| {
            Error::ExecutorNotFound(format!("primary instance {} is not in state", primary))
        })?;
        Ok(instance.config.host_id)
    }
}

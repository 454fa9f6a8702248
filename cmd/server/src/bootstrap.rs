//! Startup provisioning: advertised address resolution, TLS material and
//! the optional Portainer Edge agent.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};

use anyhow::Context;
use bollard::models::{ContainerCreateBody, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, StartContainerOptions,
};
use chrono::Datelike;
use futures::StreamExt;
use k2d_adapter::EngineAdapter;
use k2d_core::config::Config;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, date_time_ymd,
};
use rustls::ServerConfig;
use tracing::info;

const CERTIFICATE_VALIDITY_YEARS: i32 = 25;
const EDGE_AGENT_CONTAINER: &str = "portainer-edge-agent";

pub struct TlsMaterial {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsMaterial {
    /// Listener configuration backed by the persisted certificate and key.
    /// Reading the material back instead of reusing the in-memory pair
    /// keeps restarts and fresh bootstraps on the same code path.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let cert_pem =
            fs::read(&self.cert).with_context(|| format!("failed to read {:?}", self.cert))?;
        let key_pem =
            fs::read(&self.key).with_context(|| format!("failed to read {:?}", self.key))?;

        let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to parse {:?}", self.cert))?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .with_context(|| format!("failed to parse {:?}", self.key))?
            .ok_or_else(|| anyhow::anyhow!("{:?} contains no private key", self.key))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("failed to assemble TLS configuration")?;
        // kubectl speaks both, prefer h2
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

/// The IPv4 address written into certificates and the kubeconfig. When not
/// configured, the primary outbound interface address is used; connecting a
/// UDP socket selects it without sending a packet.
pub fn advertised_address(config: &Config) -> anyhow::Result<Ipv4Addr> {
    if let Some(address) = config.advertise_addr {
        return Ok(address);
    }

    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind probe socket")?;
    socket
        .connect("1.1.1.1:80")
        .context("failed to resolve outbound interface")?;
    match socket.local_addr().context("failed to read local address")? {
        SocketAddr::V4(address) => Ok(*address.ip()),
        SocketAddr::V6(_) => anyhow::bail!("no IPv4 address detected, set K2D_ADVERTISE_ADDR"),
    }
}

/// Ensure the CA, server certificate and key exist under
/// `<data-path>/ssl/`, generating a 25-year self-signed set when absent.
pub fn ensure_tls_material(data_path: &Path, address: Ipv4Addr) -> anyhow::Result<TlsMaterial> {
    let ssl = data_path.join("ssl");
    let material = TlsMaterial {
        ca: ssl.join("ca.pem"),
        cert: ssl.join("cert.pem"),
        key: ssl.join("key.pem"),
    };

    if material.ca.exists() && material.cert.exists() && material.key.exists() {
        return Ok(material);
    }

    fs::create_dir_all(&ssl).with_context(|| format!("failed to create {ssl:?}"))?;
    let not_after = date_time_ymd(chrono::Utc::now().year() + CERTIFICATE_VALIDITY_YEARS, 1, 1);

    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "k2d CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.not_after = not_after;
    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name.push(DnType::CommonName, "k2d");
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(address)));
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_after = not_after;
    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, &ca_cert, &ca_key)?;

    fs::write(&material.ca, ca_cert.pem())
        .with_context(|| format!("failed to write {:?}", material.ca))?;
    fs::write(&material.cert, cert.pem())
        .with_context(|| format!("failed to write {:?}", material.cert))?;
    fs::write(&material.key, key.serialize_pem())
        .with_context(|| format!("failed to write {:?}", material.key))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&material.key, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to chmod {:?}", material.key))?;
    }

    info!(msg = "generated TLS material", path = %ssl.display(), address = %address);
    Ok(material)
}

/// Deploy the Portainer Edge agent when the edge key and ID are configured.
/// An existing agent container is left alone.
pub async fn deploy_edge_agent(adapter: &EngineAdapter, config: &Config) -> anyhow::Result<()> {
    let (Some(edge_key), Some(edge_id)) = (&config.edge_key, &config.edge_id) else {
        return Ok(());
    };

    let docker = adapter.docker();
    if docker
        .inspect_container(
            EDGE_AGENT_CONTAINER,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
        .is_ok()
    {
        info!(msg = "edge agent already deployed");
        return Ok(());
    }

    let image = format!("portainer/agent:{}", config.edge_agent_version);
    let mut pull = docker.create_image(
        Some(CreateImageOptionsBuilder::default().from_image(&image).build()),
        None,
        None,
    );
    while let Some(progress) = pull.next().await {
        progress.with_context(|| format!("failed to pull {image}"))?;
    }

    let body = ContainerCreateBody {
        image: Some(image),
        env: Some(vec![
            "EDGE=1".to_string(),
            "EDGE_INSECURE_POLL=1".to_string(),
            format!("EDGE_ID={edge_id}"),
            format!("EDGE_KEY={edge_key}"),
        ]),
        host_config: Some(HostConfig {
            binds: Some(vec![
                "/var/run/docker.sock:/var/run/docker.sock".to_string(),
                "/var/lib/docker/volumes:/var/lib/docker/volumes".to_string(),
            ]),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ALWAYS),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    docker
        .create_container(
            Some(
                CreateContainerOptionsBuilder::default()
                    .name(EDGE_AGENT_CONTAINER)
                    .build(),
            ),
            body,
        )
        .await
        .context("failed to create edge agent container")?;
    docker
        .start_container(EDGE_AGENT_CONTAINER, None::<StartContainerOptions>)
        .await
        .context("failed to start edge agent container")?;

    info!(msg = "edge agent deployed");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tls_material_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let address = Ipv4Addr::new(192, 168, 1, 10);

        let material = ensure_tls_material(dir.path(), address).unwrap();
        assert!(material.ca.exists());
        assert!(material.cert.exists());
        assert!(material.key.exists());

        let ca_before = fs::read(&material.ca).unwrap();
        let again = ensure_tls_material(dir.path(), address).unwrap();
        assert_eq!(fs::read(&again.ca).unwrap(), ca_before);
    }

    #[test]
    fn test_generated_pem_shape() {
        let dir = tempfile::tempdir().unwrap();
        let material = ensure_tls_material(dir.path(), Ipv4Addr::LOCALHOST).unwrap();

        let ca = fs::read_to_string(&material.ca).unwrap();
        assert!(ca.starts_with("-----BEGIN CERTIFICATE-----"));
        let key = fs::read_to_string(&material.key).unwrap();
        assert!(key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_server_config_from_generated_material() {
        let dir = tempfile::tempdir().unwrap();
        let material = ensure_tls_material(dir.path(), Ipv4Addr::LOCALHOST).unwrap();

        let config = material.server_config().unwrap();
        assert!(config.alpn_protocols.contains(&b"h2".to_vec()));
    }
}

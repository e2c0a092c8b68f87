//! Connection setup for SQL Server.

use crate::{
    config::{ConnectionConfig, Password},
    error::TapError,
    Result,
};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub(super) type SqlClient = Client<Compat<TcpStream>>;

/// Builds the driver configuration. The password is handed over here and
/// nowhere else.
pub(super) fn build_config(config: &ConnectionConfig, password: &Password) -> Config {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(&config.database);
    tds.application_name(crate::config::TAP_NAME);
    tds.authentication(AuthMethod::sql_server(&config.username, password.expose()));

    if config.encrypt {
        if config.trust_server_certificate {
            tds.trust_cert();
        }
        tds.encryption(EncryptionLevel::Required);
    } else {
        tds.encryption(EncryptionLevel::NotSupported);
    }
    tds
}

/// Opens a TDS session, bounded by the configured connect timeout.
///
/// # Errors
/// Connection errors carry the host, port and database but never the
/// credentials.
pub(super) async fn connect(config: &ConnectionConfig, password: &Password) -> Result<SqlClient> {
    config.validate()?;
    let tds = build_config(config, password);

    let session = async {
        let tcp = TcpStream::connect(tds.get_addr())
            .await
            .map_err(|e| TapError::connection_failed(config.to_string(), e))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| TapError::connection_failed(config.to_string(), e))?;
        Ok::<_, TapError>(client)
    };

    let client = tokio::time::timeout(config.connect_timeout, session)
        .await
        .map_err(|_| {
            TapError::connection_failed(
                config.to_string(),
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no session after {:?}", config.connect_timeout),
                ),
            )
        })??;

    tracing::info!("Connected to {}", config);
    Ok(client)
}

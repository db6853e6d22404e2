//! TAP interface through the `tun` crate

use super::{DeviceError, InterfaceProvider, VirtualInterface};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Layer-2 TAP device
pub struct TapInterface {
    name: String,
    reader: Mutex<ReadHalf<tun::AsyncDevice>>,
    writer: Mutex<WriteHalf<tun::AsyncDevice>>,
    closed: CancellationToken,
}

#[async_trait]
impl VirtualInterface for TapInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(DeviceError::Closed),
            n = reader.read(buf) => match n? {
                0 => Err(DeviceError::Closed),
                n => Ok(n),
            },
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<(), DeviceError> {
        if self.closed.is_cancelled() {
            return Err(DeviceError::Closed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(DeviceError::Closed),
            res = writer.write_all(frame) => Ok(res?),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Opens TAP devices; needs CAP_NET_ADMIN or root
#[derive(Debug, Clone, Default)]
pub struct TapProvider;

#[async_trait]
impl InterfaceProvider for TapProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn VirtualInterface>, DeviceError> {
        let mut config = tun::Configuration::default();
        config.name(name).layer(tun::Layer::L2).up();
        #[cfg(target_os = "linux")]
        config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create_as_async(&config).map_err(|e| match e {
            tun::Error::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                DeviceError::PermissionDenied(io.to_string())
            }
            other => DeviceError::Open(other.to_string()),
        })?;

        info!(interface = %name, "TAP interface created");

        let (reader, writer) = tokio::io::split(device);
        Ok(Arc::new(TapInterface {
            name: name.to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }))
    }
}

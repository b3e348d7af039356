//! MQTT clients for a toy pressure control loop: a first-order process, a
//! bang-bang regulator closing the loop over the broker, and a harness that
//! measures broker round-trip time.

#[macro_use]
extern crate tracing;

pub mod consts;
pub mod delivery;
pub mod driver;
pub mod error;
pub mod event;
pub mod payload;
pub mod process;
pub mod reconnect;
pub mod regulator;
pub mod response_time;
pub mod settings;
pub mod transport;

pub use driver::{Application, Driver};
pub use error::{LoopError, LoopResult, TransportError};
pub use event::{DeliveryToken, Event, Outbound};
pub use process::{ProcessSimulator, ProcessState};
pub use reconnect::{ConnectionState, ReconnectPolicy};
pub use regulator::{Regulator, RegulatorState};
pub use response_time::ResponseTimeHarness;
pub use settings::{Role, Settings};
pub use transport::{MqttTransport, Transport};

/// Connects to the configured broker and runs the configured role until it
/// finishes or fails fatally.
pub async fn run(settings: &Settings) -> LoopResult<()> {
    let transport = MqttTransport::new(settings)?;
    let mut driver = Driver::new(
        transport,
        ReconnectPolicy::from_settings(&settings.reconnect),
        settings.publish_timeout(),
    );
    info!(
        "starting {} as {} against {}:{}",
        settings.role,
        settings.client_id(),
        settings.broker.host,
        settings.broker.port
    );
    match settings.role {
        Role::Process => driver.run(&mut ProcessSimulator::from_settings(settings)?).await,
        Role::Regulator => driver.run(&mut Regulator::from_settings(settings)?).await,
        Role::ResponseTime => {
            driver
                .run(&mut ResponseTimeHarness::from_settings(settings)?)
                .await
        }
    }
}

/**
 * MCM VSPHERE PLUGIN - Fournisseur de machines vSphere piloté par MQTT
 *
 * RÔLE :
 * Plugin autonome qui expose le cycle de vie des machines (create, delete,
 * shutdown, status, list) à l'orchestrateur via des topics MQTT.
 *
 * FONCTIONNEMENT :
 * - Config YAML (plugin.yaml ou $MCM_VSPHERE_PLUGIN_CONFIG) + .env
 * - Écoute MQTT : commandes JSON taguées par "action"
 * - Chaque commande tourne dans sa propre tâche Tokio, avec une deadline
 * - Répond sur MQTT : succès ou erreur avec code machine-lisible
 *
 * UTILITÉ :
 * 🎯 Sans état : chaque opération ouvre et referme sa propre session
 * 🎯 Parallèle : des machines différentes avancent en même temps
 * 🎯 Arrêt propre : Ctrl-C annule les opérations en cours, attend leurs
 *    réponses et les publie avant de se déconnecter
 *
 * COMMUNICATION MQTT :
 * Écoute: mcm/vsphere/command@v1
 * Publie: mcm/vsphere/response@v1
 */

mod commands;
mod config;
mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mcm_vsphere_core::{MachineProvider, Simulator};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{PluginConfig, SimulatorConf};
use crate::dispatch::Dispatcher;

/// Délai max pour vider la file MQTT à l'arrêt
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn build_simulator(conf: &SimulatorConf) -> Simulator {
    let mut simulator = Simulator::new(&conf.datacenter);
    for template in &conf.templates {
        simulator = simulator.with_template(template);
    }
    if let (Some(user), Some(pass)) = (&conf.username, &conf.password) {
        simulator = simulator.with_credentials(user, pass);
    }
    simulator
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcm_vsphere=info")),
        )
        .init();

    info!("🖥️ MCM vSphere plugin starting...");

    let cfg: PluginConfig = config::load_config().await.context("Failed to load plugin config")?;
    let provider = Arc::new(MachineProvider::new(build_simulator(&cfg.simulator)));
    info!(
        datacenter = %cfg.simulator.datacenter,
        templates = cfg.simulator.templates.len(),
        "simulator backend ready"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, cancelling in-flight operations");
            }
            shutdown.cancel();
        });
    }

    let mut mqttopts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttopts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
    let (client, mut eventloop) = AsyncClient::new(mqttopts, 10);

    client
        .subscribe(&cfg.topics.command, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to command topic")?;
    info!("connected to MQTT, listening on {}", cfg.topics.command);

    let dispatcher = Dispatcher::new(
        provider,
        client.clone(),
        cfg.topics.response.clone(),
        Duration::from_secs(cfg.provider.operation_timeout_secs),
        shutdown.clone(),
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == cfg.topics.command => {
                    dispatcher.dispatch(publish.payload.to_vec());
                }
                Ok(_) => {
                    // Autres événements MQTT ignorés
                }
                Err(e) => {
                    warn!("MQTT error: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    // Les commandes en cours sont annulées; on attend leurs réponses
    // en continuant à faire tourner la boucle MQTT pour les publier.
    dispatcher.close();
    info!("waiting for {} in-flight command(s)", dispatcher.in_flight());
    loop {
        tokio::select! {
            _ = dispatcher.wait() => break,
            event = eventloop.poll() => {
                if let Err(e) = event {
                    warn!("MQTT error while draining: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("MQTT disconnect failed: {:?}", e);
    } else if tokio::time::timeout(FLUSH_TIMEOUT, flush_until_disconnect(&mut eventloop))
        .await
        .is_err()
    {
        warn!("MQTT queue not flushed within {:?}", FLUSH_TIMEOUT);
    }
    info!("plugin stopped");
    Ok(())
}

/// Fait tourner la boucle jusqu'à l'envoi du DISCONNECT (réponses en file comprises)
async fn flush_until_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT error while flushing: {:?}", e);
                return;
            }
        }
    }
}

//! Monitor en vivo del canal de control OCPP.
//!
//! Este módulo implementa un **Actor de Conexión**: una única tarea de tokio que
//! serializa todos los eventos del transporte (apertura, trama, error, cierre),
//! los comandos del operador y los disparos del temporizador de reconexión.
//!
//! # Arquitectura de Actores
//! 1. `LiveMonitor` es el handle clonable; sus métodos nunca bloquean ni fallan.
//! 2. El actor (`ConnectionActor`) es el único que agrega tramas al buffer y el
//!    único que notifica snapshots, así que los suscriptores los ven en orden.
//! 3. Cada intento de conexión corre en su propia tarea de transporte, etiquetada
//!    con una generación; los eventos de generaciones anteriores se descartan.
//! 4. Ante un error o cierre, el actor programa un único reintento tras una espera fija.
//!
//! # Máquina de Estados
//! `Disconnected → Connecting → Connected → ReconnectScheduled → Connecting → …`
//! `disconnect()` lleva cualquier estado a `Disconnected` y suprime la reconexión.


use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, instrument, warn};
use crate::channels::domain::{Listeners, SubscriptionId};
use crate::message::domain::{MessageRecord, RawFrame};
use crate::message::logic::classify_frame;
use crate::monitor::domain::{CloseAck, Command, ConnectionState, CorrelationTable, Event, MonitorConfig, MonitorError, ReconnectTimer};
use crate::presentation::logic::export_json;


/// Buffer compartido con los suscriptores de snapshots.
type Buffer = Arc<Vec<MessageRecord>>;


/// Estado compartido entre el handle y el actor.
#[derive(Debug)]
struct Shared {
    /// Sólo se copia al agregar si alguien retiene un snapshot anterior.
    buffer: RwLock<Buffer>,
    paused: AtomicBool,
    /// Aumenta con cada `disconnect()`; una conexión abierta en una época
    /// anterior ya no agrega tramas.
    epoch: AtomicU64,
    state: Mutex<ConnectionState>,
    on_message: Listeners<MessageRecord>,
    on_messages: Listeners<Buffer>,
    on_connection: Listeners<bool>,
    on_error: Listeners<MonitorError>,
}


impl Shared {
    fn new() -> Self {
        Self {
            buffer: RwLock::new(Arc::new(Vec::new())),
            paused: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state: Mutex::new(ConnectionState::Disconnected),
            on_message: Listeners::new(),
            on_messages: Listeners::new(),
            on_connection: Listeners::new(),
            on_error: Listeners::new(),
        }
    }

    fn snapshot(&self) -> Vec<MessageRecord> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner).to_vec()
    }

    fn shared_buffer(&self) -> Buffer {
        Arc::clone(&*self.buffer.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn message_count(&self) -> usize {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push(&self, record: MessageRecord) {
        let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *buffer).push(record);
    }

    fn clear(&self) {
        *self.buffer.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn begin_disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}


/// Handle del monitor en vivo.
///
/// Los clones comparten buffer, conexión y suscriptores. Se construye una única
/// instancia en la raíz de composición (`AppContext`) y se inyecta donde haga falta.
/// Requiere un runtime de tokio activo al construirse.
#[derive(Clone, Debug)]
pub struct LiveMonitor {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    url: Arc<str>,
}


impl LiveMonitor {

    /// Crea el monitor y lanza su actor de conexión. No conecta todavía.
    pub fn new(config: MonitorConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel::<Command>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<Event>();
        let url: Arc<str> = Arc::from(config.url.as_str());

        let actor = ConnectionActor::new(config, Arc::clone(&shared), events_tx);
        tokio::spawn(async move {
            actor.run(commands_rx, events_rx).await;
        });

        Self { shared, commands: commands_tx, url }
    }

    /// Abre la conexión si no hay una abierta o en curso.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Cierra la conexión y desactiva la reconexión automática.
    ///
    /// Las tramas que lleguen a partir de este momento se ignoran aunque el
    /// transporte todavía no haya terminado de cerrarse.
    pub fn disconnect(&self) {
        self.shared.begin_disconnect();
        self.send(Command::Disconnect(None));
    }

    /// Igual que `disconnect`, pero espera a que el websocket envíe su frame de cierre.
    ///
    /// # Argumentos
    /// * `limit` - Espera máxima por la confirmación del transporte.
    ///
    /// Retorna `false` si el cierre no se confirmó dentro de `limit`.
    pub async fn disconnect_and_wait(&self, limit: Duration) -> bool {
        self.shared.begin_disconnect();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Disconnect(Some(ack_tx)));

        match timeout(limit, ack_rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("Warning: el transporte terminó sin confirmar el cierre");
                false
            }
            Err(_) => {
                warn!("Warning: cierre del feed sin confirmar tras {:?}", limit);
                false
            }
        }
    }

    /// Mientras está en pausa las tramas entrantes se descartan, no se encolan.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
        info!("Info: captura {}", if paused { "pausada" } else { "reanudada" });
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Vacía el buffer y notifica el snapshot resultante. No afecta la conexión.
    ///
    /// El vaciado es inmediato; la notificación la entrega el actor después de
    /// cualquier snapshot que ya tuviera en curso.
    pub fn clear_messages(&self) {
        self.shared.clear();
        self.send(Command::Clear);
    }

    /// Copia del buffer en orden de llegada.
    pub fn get_all_messages(&self) -> Vec<MessageRecord> {
        self.shared.snapshot()
    }

    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serializa el buffer completo como arreglo JSON legible.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        export_json(&self.shared.shared_buffer())
    }

    /// Notificación por cada registro nuevo.
    pub fn on_message<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&MessageRecord) + Send + Sync + 'static,
    {
        self.shared.on_message.subscribe(callback)
    }

    /// Notificación con el buffer completo tras cada cambio.
    pub fn on_messages<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[MessageRecord]) + Send + Sync + 'static,
    {
        self.shared.on_messages.subscribe(move |buffer: &Buffer| callback(buffer.as_slice()))
    }

    /// Notificación `true`/`false` al conectarse o desconectarse.
    pub fn on_connection_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.shared.on_connection.subscribe(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&MonitorError) + Send + Sync + 'static,
    {
        self.shared.on_error.subscribe(callback)
    }

    /// Retira una suscripción de cualquiera de los canales.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.on_message.unsubscribe(id)
            || self.shared.on_messages.unsubscribe(id)
            || self.shared.on_connection.unsubscribe(id)
            || self.shared.on_error.unsubscribe(id)
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            error!("Error: el actor de conexión no está disponible para {:?}", e.0);
        }
    }
}


/// Dueño exclusivo de la conexión, el temporizador y la escritura del buffer.
struct ConnectionActor {
    config: MonitorConfig,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<Event>,
    state: ConnectionState,
    generation: u64,
    /// Época de `Shared` vigente al abrir la conexión actual.
    open_epoch: u64,
    auto_reconnect: bool,
    shutdown: Option<oneshot::Sender<Option<CloseAck>>>,
    timer: ReconnectTimer,
    correlation: CorrelationTable,
}


impl ConnectionActor {
    fn new(config: MonitorConfig, shared: Arc<Shared>, events_tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            timer: ReconnectTimer::new(events_tx.clone()),
            config,
            shared,
            events_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            open_epoch: 0,
            auto_reconnect: false,
            shutdown: None,
            correlation: CorrelationTable::default(),
        }
    }

    /// Bucle principal del actor de conexión.
    ///
    /// # Argumentos
    /// * `commands` - Canal de comandos de los handles (`connect`, `disconnect`, `clear`).
    /// * `events` - Canal de eventos de las tareas de transporte y del temporizador.
    ///
    /// # Flujo de Trabajo
    /// 1. Atiende primero los comandos pendientes y luego los eventos, uno a la vez.
    /// 2. Cada evento se valida contra la generación vigente antes de aplicarse.
    /// 3. Cuando se sueltan todos los handles, cierra el transporte y termina.
    #[instrument(name = "ocpp_monitor_actor", skip_all, fields(url = %self.config.url))]
    async fn run(mut self,
                 mut commands: mpsc::UnboundedReceiver<Command>,
                 mut events: mpsc::UnboundedReceiver<Event>) {

        info!("Info: actor de conexión creado");

        loop {
            tokio::select! {
                // Un disconnect() encolado se aplica antes que las tramas que
                // siguen esperando en el canal de eventos.
                biased;

                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.timer.cancel();
                            self.close_transport(None);
                            break;
                        }
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        info!("Info: actor de conexión finalizado");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.handle_connect(),
            Command::Disconnect(ack) => self.handle_disconnect(ack),
            Command::Clear => self.emit_snapshot(),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("Debug: estado {:?} -> {:?}", self.state, state);
        self.state = state;
        self.shared.set_state(state);
    }

    fn handle_connect(&mut self) {
        self.auto_reconnect = true;

        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            debug!("Debug: connect ignorado, ya hay una conexión {:?}", self.state);
            return;
        }

        self.timer.cancel();
        self.open();
    }

    fn handle_disconnect(&mut self, ack: Option<CloseAck>) {
        self.auto_reconnect = false;
        if self.timer.is_pending() {
            info!("Info: reconexión pendiente cancelada");
        }
        self.timer.cancel();
        self.close_transport(ack);
        self.set_state(ConnectionState::Disconnected);
        info!("Info: monitor desconectado");
        self.shared.on_connection.emit(&false);
    }

    fn open(&mut self) {
        self.generation += 1;
        self.open_epoch = self.shared.epoch();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Reemplazar el sender cierra cualquier transporte anterior.
        self.shutdown = Some(shutdown_tx);
        self.set_state(ConnectionState::Connecting);

        tokio::spawn(run_transport(
            self.config.url.clone(),
            self.generation,
            self.events_tx.clone(),
            shutdown_rx,
        ));
    }

    fn close_transport(&mut self, ack: Option<CloseAck>) {
        match self.shutdown.take() {
            Some(shutdown) => {
                // El transporte ya terminó: no queda nada por cerrar.
                if let Err(Some(ack)) = shutdown.send(ack) {
                    let _ = ack.send(());
                }
            }
            None => {
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
        }
        // Invalida los eventos que el transporte pueda seguir enviando.
        self.generation += 1;
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Opened(generation) if generation == self.generation => {
                self.timer.cancel();
                self.set_state(ConnectionState::Connected);
                info!("Info: conectado al feed OCPP");
                self.shared.on_connection.emit(&true);
            }
            Event::Frame(generation, text) if generation == self.generation => {
                self.handle_frame(text);
            }
            Event::Failed(generation, err) | Event::Closed(generation, err) if generation == self.generation => {
                self.handle_failure(err);
            }
            Event::ReconnectDue(id) => {
                if self.timer.take_if_current(id)
                    && self.auto_reconnect
                    && self.state == ConnectionState::ReconnectScheduled {
                    info!("Info: reintentando conexión al feed");
                    self.open();
                }
            }
            other => debug!("Debug: evento obsoleto descartado {:?}", other),
        }
    }

    fn handle_failure(&mut self, err: MonitorError) {
        warn!("Warning: {}", err);
        self.shutdown = None;
        let was_connected = self.state == ConnectionState::Connected;

        if self.auto_reconnect {
            self.timer.schedule(self.config.reconnect_delay);
            self.set_state(ConnectionState::ReconnectScheduled);
            info!("Info: reconexión programada en {:?}", self.config.reconnect_delay);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }

        if was_connected {
            self.shared.on_connection.emit(&false);
        }
        self.shared.on_error.emit(&err);
    }

    fn handle_frame(&mut self, text: String) {
        if self.shared.epoch() != self.open_epoch {
            debug!("Debug: trama ignorada tras disconnect");
            return;
        }
        if self.shared.paused.load(Ordering::SeqCst) {
            debug!("Debug: trama descartada, captura en pausa");
            return;
        }

        let frame = RawFrame::parse(&text);
        let hint = if self.config.correlate_responses {
            self.correlate(&frame)
        } else {
            None
        };
        let record = classify_frame(&frame, &text, hint.as_deref());
        debug!("Debug: {} {} {}", record.direction, record.action, record.summary);

        self.shared.push(record.clone());
        self.shared.on_message.emit(&record);
        self.emit_snapshot();
    }

    /// Notifica el buffer vigente sin copiarlo.
    fn emit_snapshot(&self) {
        if self.shared.on_messages.is_empty() {
            return;
        }
        let snapshot = self.shared.shared_buffer();
        self.shared.on_messages.emit(&snapshot);
    }

    fn correlate(&mut self, frame: &RawFrame) -> Option<String> {
        match frame {
            RawFrame::Call { unique_id: Some(unique_id), action: Some(action), .. } => {
                self.correlation.remember(unique_id, action);
                debug!("Debug: {} llamadas esperando respuesta", self.correlation.len());
                None
            }
            RawFrame::CallResult { unique_id: Some(unique_id), .. } => self.correlation.resolve(unique_id),
            RawFrame::CallError { unique_id: Some(unique_id), .. } => {
                self.correlation.resolve(unique_id);
                None
            }
            _ => None,
        }
    }
}


/// Tarea de transporte de una generación.
///
/// # Argumentos
/// * `url` - Endpoint WebSocket del feed.
/// * `generation` - Etiqueta que acompaña a cada evento enviado al actor.
/// * `events` - Canal hacia el actor de conexión.
/// * `shutdown` - Señal de cierre; puede traer un ack que se responde al terminar.
///
/// # Flujo de Trabajo
/// 1. Conecta, salvo que llegue antes la señal de cierre.
/// 2. Reenvía cada trama de texto (o binaria, decodificada con pérdida) como `Event::Frame`.
/// 3. Termina al recibir la señal de cierre, tras enviar el frame de cierre del websocket.
/// 4. Un cierre remoto o un error se informan al actor y también terminan la tarea.
#[instrument(name = "ocpp_feed_transport", skip(events, shutdown))]
async fn run_transport(url: String,
                       generation: u64,
                       events: mpsc::UnboundedSender<Event>,
                       mut shutdown: oneshot::Receiver<Option<CloseAck>>) {

    let connected = tokio::select! {
        ack = &mut shutdown => {
            // Sin websocket abierto no hay frame de cierre que enviar.
            if let Ok(Some(ack)) = ack {
                let _ = ack.send(());
            }
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let mut stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let _ = events.send(Event::Failed(generation, MonitorError::Connect { url, reason: e.to_string() }));
            return;
        }
    };

    if events.send(Event::Opened(generation)).is_err() {
        return;
    }

    loop {
        tokio::select! {
            ack = &mut shutdown => {
                if let Err(e) = stream.close(None).await {
                    debug!("Debug: cierre del websocket incompleto {}", e);
                }
                if let Ok(Some(ack)) = ack {
                    let _ = ack.send(());
                }
                return;
            }

            incoming = stream.next() => {
                let event = match incoming {
                    Some(Ok(WsMessage::Text(text))) => Event::Frame(generation, text.as_str().to_owned()),
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        Event::Frame(generation, String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|reason| !reason.is_empty());
                        let _ = events.send(Event::Closed(generation, MonitorError::Closed(reason)));
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(Event::Failed(generation, MonitorError::Transport(e.to_string())));
                        return;
                    }
                    None => {
                        let _ = events.send(Event::Closed(generation, MonitorError::Closed(None)));
                        return;
                    }
                };

                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use crate::message::domain::Direction;

    struct FeedServer {
        url: String,
        accepted: Arc<AtomicUsize>,
        frames: mpsc::UnboundedSender<String>,
    }

    /// Servidor WebSocket local que envía a los clientes las tramas del canal `frames`.
    async fn start_feed_server() -> FeedServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let frames_rx = Arc::new(tokio::sync::Mutex::new(frames_rx));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let frames_rx = Arc::clone(&frames_rx);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    let mut frames_rx = frames_rx.lock().await;
                    while let Some(frame) = frames_rx.recv().await {
                        if ws.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        FeedServer { url: format!("ws://{addr}"), accepted, frames: frames_tx }
    }

    /// Servidor TCP que acepta y corta enseguida: todo handshake falla.
    async fn start_refusing_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(tcp);
            }
        });
        (format!("ws://{addr}"), accepted)
    }

    /// Servidor que cierra la primera conexión con un frame de cierre y mantiene
    /// abiertas las siguientes.
    async fn start_closing_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    if index == 0 {
                        let close = CloseFrame { code: CloseCode::Away, reason: "reinicio".to_string().into() };
                        let _ = ws.send(WsMessage::Close(Some(close))).await;
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        (format!("ws://{addr}"), accepted)
    }

    /// Servidor que marca `closed` cuando el cliente envía su frame de cierre.
    async fn start_close_recording_server() -> (String, Arc<AtomicBool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let flag = Arc::clone(&flag);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        if message.is_close() {
                            flag.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}"), closed)
    }

    /// Actor sin transporte, como si la generación 1 estuviera conectada.
    fn connected_actor(shared: &Arc<Shared>) -> ConnectionActor {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut actor = ConnectionActor::new(MonitorConfig::new("ws://127.0.0.1:9"), Arc::clone(shared), events_tx);
        actor.generation = 1;
        actor.open_epoch = shared.epoch();
        actor.state = ConnectionState::Connected;
        actor
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("la condición no se cumplió a tiempo");
    }

    fn record_connection_events(monitor: &LiveMonitor) -> Arc<Mutex<Vec<bool>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        monitor.on_connection_change(move |connected| sink.lock().unwrap().push(*connected));
        events
    }

    fn frame(unique_id: &str, action: &str) -> String {
        format!(r#"[2, "{unique_id}", "{action}", {{}}]"#)
    }

    #[tokio::test]
    async fn connect_es_idempotente() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        monitor.connect();
        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        monitor.connect();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
        assert_eq!(events.lock().unwrap().iter().filter(|c| **c).count(), 1);
        assert_eq!(monitor.state(), ConnectionState::Connected);

        monitor.disconnect();
        wait_until(|| events.lock().unwrap().last() == Some(&false)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn las_tramas_se_clasifican_y_se_notifican() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        let received = Arc::new(Mutex::new(Vec::<MessageRecord>::new()));
        let sink = Arc::clone(&received);
        monitor.on_message(move |record| sink.lock().unwrap().push(record.clone()));

        let snapshots = Arc::new(Mutex::new(Vec::<usize>::new()));
        let sink = Arc::clone(&snapshots);
        monitor.on_messages(move |buffer| sink.lock().unwrap().push(buffer.len()));

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;

        server.frames.send(r#"[2, "abc123", "MeterValues", { "meterValue": [{ "sampledValue": [{ "value": 10.5, "measurand": "Current.Import" }] }] }]"#.to_string()).unwrap();
        server.frames.send("basura".to_string()).unwrap();
        wait_until(|| monitor.message_count() == 2).await;

        let all = monitor.get_all_messages();
        assert_eq!(all[0].action, "MeterValues");
        assert_eq!(all[0].direction, Direction::Incoming);
        assert!(all[0].summary.contains("Current.Import: 10.5"));
        assert_eq!(all[1].action, "Unknown");
        assert_eq!(all[1].raw_data, "basura");

        assert_eq!(received.lock().unwrap().len(), 2);
        assert_eq!(*snapshots.lock().unwrap(), vec![1, 2]);

        monitor.disconnect();
    }

    #[tokio::test]
    async fn en_pausa_las_tramas_se_descartan() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        monitor.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;

        server.frames.send(frame("1", "Heartbeat")).unwrap();
        wait_until(|| monitor.message_count() == 1).await;

        monitor.set_paused(true);
        assert!(monitor.is_paused());
        server.frames.send(frame("2", "Authorize")).unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(monitor.message_count(), 1);

        monitor.set_paused(false);
        server.frames.send(frame("3", "StatusNotification")).unwrap();
        wait_until(|| monitor.message_count() == 2).await;

        let actions: Vec<String> = monitor.get_all_messages().into_iter().map(|r| r.action).collect();
        assert_eq!(actions, vec!["Heartbeat", "StatusNotification"]);
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        monitor.disconnect();
    }

    #[tokio::test]
    async fn clear_vacia_el_buffer_sin_desconectar() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        let last_snapshot = Arc::new(Mutex::new(None::<usize>));
        let sink = Arc::clone(&last_snapshot);
        monitor.on_messages(move |buffer| *sink.lock().unwrap() = Some(buffer.len()));

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        for i in 0..5 {
            server.frames.send(frame(&i.to_string(), "Heartbeat")).unwrap();
        }
        wait_until(|| monitor.message_count() == 5).await;

        monitor.clear_messages();
        assert!(monitor.get_all_messages().is_empty());
        wait_until(|| *last_snapshot.lock().unwrap() == Some(0)).await;
        assert_eq!(monitor.state(), ConnectionState::Connected);

        monitor.disconnect();
    }

    #[tokio::test]
    async fn la_copia_no_modifica_el_buffer() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        server.frames.send(frame("1", "Heartbeat")).unwrap();
        wait_until(|| monitor.message_count() == 1).await;

        let mut copy = monitor.get_all_messages();
        copy.clear();
        assert_eq!(monitor.message_count(), 1);

        let exported: serde_json::Value = serde_json::from_str(&monitor.export_json().unwrap()).unwrap();
        assert_eq!(exported.as_array().map(Vec::len), Some(1));
        assert_eq!(exported[0]["action"], "Heartbeat");

        monitor.disconnect();
    }

    #[tokio::test]
    async fn correlaciona_la_accion_de_las_respuestas() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()).with_correlation(true));
        let events = record_connection_events(&monitor);

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        server.frames.send(r#"[2, "tx-1", "StartTransaction", {"idTag": "TAG1", "connectorId": 1}]"#.to_string()).unwrap();
        server.frames.send(r#"[3, "tx-1", {"idTagInfo": {"status": "Accepted"}, "transactionId": 7}]"#.to_string()).unwrap();
        server.frames.send(r#"[3, "tx-1", {}]"#.to_string()).unwrap();
        wait_until(|| monitor.message_count() == 3).await;

        let all = monitor.get_all_messages();
        assert_eq!(all[0].summary, "Transaction start: TAG1");
        assert_eq!(all[1].action, "StartTransaction");
        assert_eq!(all[1].summary, "Transaction start response: Accepted");
        assert_eq!(all[2].action, "Unknown");

        monitor.disconnect();
    }

    #[tokio::test]
    async fn reconecta_tras_un_fallo() {
        let (url, accepted) = start_refusing_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(url).with_reconnect_delay(Duration::from_millis(50)));

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        monitor.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.connect();
        wait_until(|| accepted.load(Ordering::SeqCst) >= 3).await;
        monitor.disconnect();

        assert!(errors.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn disconnect_cancela_la_reconexion_pendiente() {
        let (url, accepted) = start_refusing_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(url).with_reconnect_delay(Duration::from_millis(200)));

        let errors = Arc::new(Mutex::new(Vec::<MonitorError>::new()));
        let sink = Arc::clone(&errors);
        monitor.on_error(move |err| sink.lock().unwrap().push(err.clone()));

        monitor.connect();
        wait_until(|| !errors.lock().unwrap().is_empty()).await;
        assert!(matches!(errors.lock().unwrap().first(), Some(MonitorError::Connect { .. })));
        assert_eq!(monitor.state(), ConnectionState::ReconnectScheduled);

        monitor.disconnect();
        wait_until(|| monitor.state() == ConnectionState::Disconnected).await;
        sleep(Duration::from_millis(600)).await;

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn los_clones_comparten_el_mismo_feed() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let other = monitor.clone();
        let events = record_connection_events(&other);

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        server.frames.send(frame("1", "Heartbeat")).unwrap();
        wait_until(|| other.message_count() == 1).await;

        assert_eq!(other.state(), ConnectionState::Connected);
        assert_eq!(other.url(), server.url);

        let id = other.on_message(|_| {});
        assert!(monitor.unsubscribe(id));

        other.disconnect();
    }

    #[tokio::test]
    async fn reconecta_cuando_el_feed_cierra_la_conexion() {
        let (url, accepted) = start_closing_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(url).with_reconnect_delay(Duration::from_millis(50)));
        let events = record_connection_events(&monitor);

        let errors = Arc::new(Mutex::new(Vec::<MonitorError>::new()));
        let sink = Arc::clone(&errors);
        monitor.on_error(move |err| sink.lock().unwrap().push(err.clone()));

        monitor.connect();
        wait_until(|| events.lock().unwrap().len() >= 3).await;
        wait_until(|| monitor.state() == ConnectionState::Connected).await;

        assert_eq!(*events.lock().unwrap(), vec![true, false, true]);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(errors.lock().unwrap().first(), Some(&MonitorError::Closed(Some("reinicio".to_string()))));

        monitor.disconnect();
    }

    #[tokio::test]
    async fn tras_disconnect_no_se_agregan_tramas() {
        let server = start_feed_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(server.url.clone()));
        let events = record_connection_events(&monitor);

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;
        server.frames.send(frame("1", "Heartbeat")).unwrap();
        wait_until(|| monitor.message_count() == 1).await;

        monitor.disconnect();
        for i in 2..6 {
            server.frames.send(frame(&i.to_string(), "Heartbeat")).unwrap();
        }
        sleep(Duration::from_millis(200)).await;

        assert_eq!(monitor.message_count(), 1);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn las_tramas_de_una_conexion_desconectada_se_ignoran() {
        let shared = Arc::new(Shared::new());
        let mut actor = connected_actor(&shared);

        actor.handle_event(Event::Frame(1, frame("1", "Heartbeat")));
        assert_eq!(shared.message_count(), 1);

        // disconnect() y connect() desde un handle, todavía sin procesar por el actor.
        shared.begin_disconnect();
        actor.handle_event(Event::Frame(1, frame("2", "Heartbeat")));

        assert_eq!(shared.message_count(), 1);
    }

    #[tokio::test]
    async fn los_comandos_se_atienden_antes_que_los_eventos() {
        let shared = Arc::new(Shared::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let actor = ConnectionActor::new(MonitorConfig::new("ws://127.0.0.1:9"), Arc::clone(&shared), events_tx.clone());

        for i in 0..20 {
            events_tx.send(Event::Frame(0, frame(&i.to_string(), "Heartbeat"))).unwrap();
        }
        commands_tx.send(Command::Disconnect(None)).unwrap();
        drop(commands_tx);

        timeout(Duration::from_secs(2), actor.run(commands_rx, events_rx)).await.unwrap();

        assert_eq!(shared.message_count(), 0);
        assert_eq!(shared.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn agregar_tramas_no_copia_el_buffer() {
        let shared = Arc::new(Shared::new());
        let mut actor = connected_actor(&shared);

        let sizes = Arc::new(Mutex::new(Vec::<usize>::new()));
        let sink = Arc::clone(&sizes);
        shared.on_messages.subscribe(move |buffer: &Buffer| sink.lock().unwrap().push(buffer.len()));

        actor.handle_event(Event::Frame(1, frame("0", "Heartbeat")));
        let first = Arc::as_ptr(&*shared.buffer.read().unwrap());

        for i in 1..500 {
            actor.handle_event(Event::Frame(1, frame(&i.to_string(), "Heartbeat")));
        }

        let buffer = shared.buffer.read().unwrap();
        assert_eq!(Arc::as_ptr(&*buffer), first);
        assert_eq!(Arc::strong_count(&*buffer), 1);
        assert_eq!(buffer.len(), 500);

        let sizes = sizes.lock().unwrap();
        assert_eq!(sizes.len(), 500);
        assert_eq!(sizes.last(), Some(&500));
    }

    #[test]
    fn la_notificacion_de_clear_refleja_el_buffer_vigente() {
        let shared = Arc::new(Shared::new());
        let mut actor = connected_actor(&shared);

        let last_snapshot = Arc::new(Mutex::new(None::<usize>));
        let sink = Arc::clone(&last_snapshot);
        shared.on_messages.subscribe(move |buffer: &Buffer| *sink.lock().unwrap() = Some(buffer.len()));

        actor.handle_event(Event::Frame(1, frame("1", "Heartbeat")));
        actor.handle_event(Event::Frame(1, frame("2", "Heartbeat")));

        // clear_messages() mientras el actor todavía procesa otra trama.
        shared.clear();
        actor.handle_event(Event::Frame(1, frame("3", "Heartbeat")));
        actor.handle_command(Command::Clear);

        assert_eq!(shared.message_count(), 1);
        assert_eq!(*last_snapshot.lock().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn disconnect_and_wait_envia_el_frame_de_cierre() {
        let (url, closed) = start_close_recording_server().await;
        let monitor = LiveMonitor::new(MonitorConfig::new(url));
        let events = record_connection_events(&monitor);

        monitor.connect();
        wait_until(|| events.lock().unwrap().contains(&true)).await;

        assert!(monitor.disconnect_and_wait(Duration::from_secs(2)).await);
        wait_until(|| closed.load(Ordering::SeqCst)).await;
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_and_wait_sin_conexion_confirma_enseguida() {
        let monitor = LiveMonitor::new(MonitorConfig::new("ws://127.0.0.1:9"));
        assert!(monitor.disconnect_and_wait(Duration::from_secs(1)).await);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }
}

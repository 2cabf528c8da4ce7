use std::process::ExitCode;
use tracing::{error, info, warn};
use ocpp_observer::context::domain::AppContext;
use ocpp_observer::message::domain::FilterCriteria;
use ocpp_observer::presentation::domain::{SortDirection, SortField};
use ocpp_observer::presentation::logic::sort_records;
use ocpp_observer::system::domain::{init_tracing, System};
use ocpp_observer::system::domain::log_store::DEFAULT_PAGE_SIZE;


#[tokio::main]
async fn main() -> ExitCode {

    let system = match System::new() {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Error: configuración inválida: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&system);

    let app_context = match AppContext::new(system) {
        Ok(context) => context,
        Err(e) => {
            error!("Error: no se pudo crear el contexto: {}", e);
            return ExitCode::FAILURE;
        }
    };

    report_recent_history(&app_context).await;

    let monitor = &app_context.monitor;
    monitor.on_message(|record| {
        info!(direction = %record.direction, action = %record.action, station = ?record.station_id, "{}", record.summary);
    });
    monitor.on_connection_change(|connected| {
        if *connected {
            info!("Info: feed OCPP conectado");
        } else {
            warn!("Warning: feed OCPP desconectado");
        }
    });
    monitor.on_error(|e| warn!("Warning: {}", e));

    info!("Info: conectando a {}", monitor.url());
    monitor.connect();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Error: no se pudo escuchar la señal de apagado: {}", e);
    }

    if !app_context.shutdown().await {
        warn!("Warning: el feed se cerró sin confirmación");
    }
    info!("Info: {} mensajes capturados en esta sesión", monitor.message_count());

    ExitCode::SUCCESS
}


/// Registra los mensajes más recientes del almacén al iniciar.
async fn report_recent_history(app_context: &AppContext) {
    let criteria = FilterCriteria {
        page: Some(0),
        size: Some(DEFAULT_PAGE_SIZE),
        ..Default::default()
    };

    match app_context.logs.query(&criteria).await {
        Ok(page) => {
            info!("Info: {} mensajes históricos en {} páginas", page.total_elements, page.total_pages);
            for record in sort_records(&page.records, SortField::ObservedAt, SortDirection::Desc) {
                info!("{} {} {} {}", record.observed_at, record.direction, record.action, record.summary);
            }
        }
        Err(e) => warn!("Warning: historial no disponible: {}", e),
    }
}

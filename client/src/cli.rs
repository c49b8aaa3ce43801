use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{
    ErrorResponse, JobInfo, JobRequest, JobResults, NodeMetrics, Resolution, TaskView,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::env;

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master de la granja de render")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Envía un job de render: una tarea por frame
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        /// Ancho en píxeles (requiere --height)
        #[arg(long, requires = "height")]
        width: Option<u32>,
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista todos los jobs
    Jobs,
    /// Lista las tareas de un job
    Tasks {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista los archivos de salida de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Marca una tarea como ignorada
    Ignore {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },
    /// Lista los nodos registrados
    Nodes,
}

impl Commands {
    fn job_request(name: String, start: u64, end: u64, width: Option<u32>, height: Option<u32>) -> JobRequest {
        JobRequest {
            name,
            frame_start: start,
            frame_end: end,
            resolution: width.zip(height).map(|(w, h)| Resolution(w, h)),
        }
    }
}

/// Parsea la respuesta o convierte el `ErrorResponse` del master en error.
async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    match resp.json::<ErrorResponse>().await {
        Ok(err) => bail!("{} ({})", err.error, status),
        Err(_) => bail!("el master respondió {}", status),
    }
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  nombre: {}", job.name);
    println!("  estado: {:?}", job.status);
    println!(
        "  tareas: total={}, completadas={}, ignoradas={}",
        job.total_tasks, job.completed_tasks, job.ignored_tasks
    );

    // progreso calculado localmente
    let done = job.completed_tasks + job.ignored_tasks;
    if job.total_tasks > 0 {
        let pct = (done as f64 / job.total_tasks as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    } else {
        println!("  progreso: (sin tareas)");
    }

    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            name,
            start,
            end,
            width,
            height,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = Commands::job_request(name, start, end, width, height);

            let job: JobInfo = parse(client.post(&url).json(&req).send().await?).await?;
            println!("Job creado:");
            print_job(&job);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let job: JobInfo = parse(client.get(&url).send().await?).await?;
            print_job(&job);
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let jobs: Vec<JobInfo> = parse(client.get(&url).send().await?).await?;
            if jobs.is_empty() {
                println!("No hay jobs.");
            }
            for job in jobs {
                println!(
                    "{}  {:<10?} {}/{} ({} ignoradas)  {}",
                    job.id,
                    job.status,
                    job.completed_tasks,
                    job.total_tasks,
                    job.ignored_tasks,
                    job.name
                );
            }
        }

        Commands::Tasks { id } => {
            let url = format!("{}/api/v1/jobs/{}/tasks", base_url, id);
            let tasks: Vec<TaskView> = parse(client.get(&url).send().await?).await?;
            for t in tasks {
                let frame = t
                    .frame
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  frame={:<6} {:<10?} tipo={}{}",
                    t.task_id,
                    frame,
                    t.status,
                    t.task_info_type,
                    if t.executable { "" } else { " (payload ilegible)" }
                );
                if !t.nodes_working.is_empty() {
                    println!("    nodos: {}", t.nodes_working.join(", "));
                }
            }
        }

        Commands::Results { id } => {
            let url = format!("{}/api/v1/jobs/{id}/results", base_url);
            let results: JobResults = parse(client.get(&url).send().await?).await?;
            println!("Resultados para job {}:", results.job_id);
            println!("  directorio de salida: {}", results.output_dir);
            if results.files.is_empty() {
                println!("  (sin archivos de salida)");
            } else {
                println!("  archivos:");
                for f in results.files {
                    println!("    - {}", f);
                }
            }
        }

        Commands::Ignore { task_id } => {
            let url = format!("{}/api/v1/tasks/{}/ignore", base_url, task_id);
            let view: TaskView = parse(client.post(&url).send().await?).await?;
            println!("Tarea {} ahora está {:?}", view.task_id, view.status);
        }

        Commands::Nodes => {
            let url = format!("{}/api/v1/nodes", base_url);
            let nodes: Vec<NodeMetrics> = parse(client.get(&url).send().await?).await?;
            if nodes.is_empty() {
                println!("No hay nodos registrados.");
            }
            for n in nodes {
                println!("Nodo {}", n.node_id);
                println!("  host           : {}", n.hostname);
                println!("  last_seen      : {} s ago", n.last_seen_secs_ago);
                println!(
                    "  concurrency    : max={}, claims activos={}",
                    n.max_concurrency, n.active_claims
                );
                println!("  completadas    : {}", n.tasks_completed);
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_con_resolucion() {
        let cli = Cli::try_parse_from([
            "client", "submit", "shot010", "--start", "1", "--end", "24", "--width", "1280",
            "--height", "720",
        ])
        .unwrap();

        let Commands::Submit {
            name,
            start,
            end,
            width,
            height,
        } = cli.command
        else {
            panic!("se esperaba submit");
        };
        let req = Commands::job_request(name, start, end, width, height);
        assert_eq!(req.name, "shot010");
        assert_eq!(req.frames().count(), 24);
        assert_eq!(req.resolution, Some(Resolution(1280, 720)));
    }

    #[test]
    fn submit_sin_resolucion_usa_default_del_master() {
        let cli =
            Cli::try_parse_from(["client", "submit", "s", "--start", "0", "--end", "0"]).unwrap();
        let Commands::Submit {
            name,
            start,
            end,
            width,
            height,
        } = cli.command
        else {
            panic!("se esperaba submit");
        };
        assert!(Commands::job_request(name, start, end, width, height)
            .resolution
            .is_none());
    }

    #[test]
    fn width_sin_height_es_error() {
        assert!(Cli::try_parse_from([
            "client", "submit", "s", "--start", "0", "--end", "1", "--width", "640"
        ])
        .is_err());
    }

    #[test]
    fn subcomandos_simples() {
        let cli = Cli::try_parse_from(["client", "ignore", "T1"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Ignore {
                task_id: "T1".to_string()
            }
        );
        assert_eq!(
            Cli::try_parse_from(["client", "nodes"]).unwrap().command,
            Commands::Nodes
        );
    }
}

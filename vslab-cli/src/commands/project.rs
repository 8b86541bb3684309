//! `vslab project` command handler
//!
//! Every action becomes one [`ControlRequest`] sent to the daemon.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use vslab_core::protocol::{ControlRequest, ControlResponse};
use vslab_core::types::{Project, ProjectId};

use crate::cli::{ProjectAction, ProjectArgs};
use crate::client::ControlClient;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `project` command.
pub async fn execute(
    args: ProjectArgs,
    socket_path: &Path,
    timeout: Duration,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let request = to_request(args.action);
    debug!(op = request.op_name(), socket = %socket_path.display(), "sending request");

    let mut client = ControlClient::connect(socket_path, timeout).await?;
    let response = client.call(&request).await?;
    let report = ProjectReport::from_response(response)?;

    writer.render(&report)?;
    Ok(())
}

/// Translate a parsed action into the wire request.
pub fn to_request(action: ProjectAction) -> ControlRequest {
    match action {
        ProjectAction::Reserve { owner, name, image } => ControlRequest::Reserve {
            owner_id: owner,
            name,
            image_kind: image,
        },
        ProjectAction::Start(t) => ControlRequest::Start {
            project_id: t.id,
            owner_id: t.owner,
        },
        ProjectAction::Stop(t) => ControlRequest::Stop {
            project_id: t.id,
            owner_id: t.owner,
        },
        ProjectAction::Destroy(t) => ControlRequest::Destroy {
            project_id: t.id,
            owner_id: t.owner,
        },
        ProjectAction::Get(t) => ControlRequest::Get {
            project_id: t.id,
            owner_id: t.owner,
        },
        ProjectAction::Touch(t) => ControlRequest::Touch {
            project_id: t.id,
            owner_id: t.owner,
        },
        ProjectAction::List { owner } => ControlRequest::List { owner_id: owner },
    }
}

/// Result of a project command.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProjectReport {
    /// One project record (reserve, get).
    Project { project: Project },
    /// A list of projects.
    List { projects: Vec<Project> },
    /// Start finished.
    Started {
        project: Project,
        already_running: bool,
    },
    /// Stop finished.
    Stopped {
        project: Project,
        already_stopped: bool,
    },
    /// Destroy finished.
    Destroyed { project_id: ProjectId },
    /// Activity recorded.
    Touched { project_id: ProjectId },
}

impl ProjectReport {
    /// Convert a successful daemon response into a report.
    ///
    /// # Errors
    ///
    /// `CliError::Protocol` when the daemon answers a project request with
    /// an unrelated response kind.
    pub fn from_response(response: ControlResponse) -> Result<Self, CliError> {
        match response {
            ControlResponse::Project { project } => Ok(Self::Project { project }),
            ControlResponse::Projects { projects } => Ok(Self::List { projects }),
            ControlResponse::Started {
                project,
                already_running,
            } => Ok(Self::Started {
                project,
                already_running,
            }),
            ControlResponse::Stopped {
                project,
                already_stopped,
            } => Ok(Self::Stopped {
                project,
                already_stopped,
            }),
            ControlResponse::Destroyed { project_id } => Ok(Self::Destroyed { project_id }),
            ControlResponse::Touched { project_id } => Ok(Self::Touched { project_id }),
            ControlResponse::Health { .. } => Err(CliError::Protocol(
                "unexpected health response to a project request".to_owned(),
            )),
            ControlResponse::Error { kind, message, .. } => {
                Err(CliError::Command { kind, message })
            }
        }
    }
}

fn write_project_detail(w: &mut dyn Write, project: &Project) -> std::io::Result<()> {
    use colored::Colorize;

    writeln!(w, "  ID:     {}", project.id)?;
    writeln!(w, "  Owner:  {}", project.owner_id)?;
    writeln!(w, "  Name:   {}", project.name)?;
    writeln!(w, "  Image:  {}", project.image_kind)?;
    match &project.placement {
        Some(p) => {
            writeln!(w, "  State:  {}", "running".green())?;
            writeln!(w, "  Host:   {}", p.host)?;
            writeln!(w, "  Container: {}", p.container_id)?;
            writeln!(
                w,
                "  Ports:  server={} terminal={} language={}",
                p.ports.server_port, p.ports.terminal_port, p.ports.language_port
            )?;
        }
        None => writeln!(w, "  State:  {}", "stopped".yellow())?,
    }
    Ok(())
}

impl Render for ProjectReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match self {
            Self::Project { project } => {
                writeln!(w, "Project {}", project.id.to_string().bold())?;
                write_project_detail(w, project)?;
            }
            Self::List { projects } => {
                if projects.is_empty() {
                    writeln!(w, "No projects.")?;
                    return Ok(());
                }
                writeln!(
                    w,
                    "{:<8} {:<8} {:<24} {:<10} {:<16} Container",
                    "ID", "Owner", "Name", "Image", "Host"
                )?;
                writeln!(w, "{}", "-".repeat(84))?;
                for p in projects {
                    writeln!(
                        w,
                        "{:<8} {:<8} {:<24} {:<10} {:<16} {}",
                        p.id,
                        p.owner_id,
                        p.name,
                        p.image_kind.to_string(),
                        p.host().unwrap_or("-"),
                        p.container_id().unwrap_or("-")
                    )?;
                }
                writeln!(w)?;
                writeln!(w, "Total: {} project(s)", projects.len())?;
            }
            Self::Started {
                project,
                already_running,
            } => {
                if *already_running {
                    writeln!(w, "Project {} already running", project.id)?;
                } else {
                    writeln!(w, "{} project {}", "Started".green().bold(), project.id)?;
                }
                write_project_detail(w, project)?;
            }
            Self::Stopped {
                project,
                already_stopped,
            } => {
                if *already_stopped {
                    writeln!(w, "Project {} already stopped", project.id)?;
                } else {
                    writeln!(w, "{} project {}", "Stopped".yellow().bold(), project.id)?;
                }
            }
            Self::Destroyed { project_id } => {
                writeln!(w, "{} project {}", "Destroyed".red().bold(), project_id)?;
            }
            Self::Touched { project_id } => {
                writeln!(w, "Activity recorded for project {project_id}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TargetArgs;
    use vslab_core::types::{ImageKind, OwnerId, Placement, PublishedPorts};

    fn project(placed: bool) -> Project {
        Project {
            id: ProjectId::new(4),
            owner_id: OwnerId::new(2),
            name: "hello".to_owned(),
            image_kind: ImageKind::Java,
            placement: placed.then(|| Placement {
                host: "10.0.0.5".to_owned(),
                container_id: "abcdef012345".to_owned(),
                ports: PublishedPorts {
                    server_port: 32768,
                    terminal_port: 32769,
                    language_port: 32770,
                },
            }),
        }
    }

    fn render(report: &ProjectReport) -> String {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        report.render_text(&mut buf).expect("render should succeed");
        String::from_utf8(buf).expect("valid UTF-8")
    }

    #[test]
    fn test_to_request_carries_owner() {
        let req = to_request(ProjectAction::Destroy(TargetArgs {
            id: ProjectId::new(9),
            owner: Some(OwnerId::new(1)),
        }));
        assert_eq!(
            req,
            ControlRequest::Destroy {
                project_id: ProjectId::new(9),
                owner_id: Some(OwnerId::new(1)),
            }
        );
    }

    #[test]
    fn test_to_request_list() {
        let req = to_request(ProjectAction::List { owner: None });
        assert_eq!(req, ControlRequest::List { owner_id: None });
    }

    #[test]
    fn test_from_response_rejects_health() {
        let resp = ControlResponse::Health {
            overall: vslab_core::pipeline::HealthStatus::Healthy,
            tracked_projects: 0,
            hosts: Vec::new(),
        };
        assert!(matches!(
            ProjectReport::from_response(resp),
            Err(CliError::Protocol(_))
        ));
    }

    #[test]
    fn test_render_running_project_shows_ports() {
        let out = render(&ProjectReport::Started {
            project: project(true),
            already_running: false,
        });
        assert!(out.contains("Started project 4"));
        assert!(out.contains("10.0.0.5"));
        assert!(out.contains("server=32768 terminal=32769 language=32770"));
    }

    #[test]
    fn test_render_reserved_project_is_stopped() {
        let out = render(&ProjectReport::Project {
            project: project(false),
        });
        assert!(out.contains("State:  stopped"));
        assert!(!out.contains("Host:"));
    }

    #[test]
    fn test_render_list_rows() {
        let out = render(&ProjectReport::List {
            projects: vec![project(true), project(false)],
        });
        assert!(out.contains("abcdef012345"));
        assert!(out.contains("Total: 2 project(s)"));
    }

    #[test]
    fn test_render_empty_list() {
        let out = render(&ProjectReport::List {
            projects: Vec::new(),
        });
        assert_eq!(out.trim(), "No projects.");
    }

    #[test]
    fn test_json_report_is_tagged() {
        let report = ProjectReport::Destroyed {
            project_id: ProjectId::new(4),
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["result"], "destroyed");
        assert_eq!(json["project_id"], 4);
    }
}

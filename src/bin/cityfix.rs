//! cityfix CLI: operator interface to the complaint routing service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cityfix::app::App;
use cityfix::config::secrets::ExposeSecret;
use cityfix::config::{Config, RoutingConfig};
use cityfix::db::Db;
use cityfix::model::*;
use cityfix::relay::{Dispatcher, DispatcherConfig, PgmqBus};
use cityfix::routing::RoutingEngine;
use cityfix::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cityfix", about = "Municipal complaint routing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the event dispatcher daemon
    Serve {
        /// TOML file with a [routing] table; re-read on SIGHUP
        #[arg(long)]
        routing_config: Option<PathBuf>,
        /// Visibility timeout (seconds) for queue reads
        #[arg(long, default_value_t = 30)]
        visibility_timeout: i32,
    },
    /// Department operations
    Department {
        #[command(subcommand)]
        action: DepartmentAction,
    },
    /// Complaint operations
    Complaint {
        #[command(subcommand)]
        action: ComplaintAction,
    },
    /// Notification operations
    Notifications {
        #[command(subcommand)]
        action: NotificationAction,
    },
    /// Route a hypothetical complaint. Charges the chosen department.
    Route {
        #[arg(long)]
        category: Category,
        #[arg(long)]
        zone: Option<String>,
        #[command(flatten)]
        location: LocationArgs,
    },
}

#[derive(Subcommand)]
enum DepartmentAction {
    /// Register a department
    Add {
        #[command(flatten)]
        fields: DepartmentFields,
    },
    /// Replace a department's details; workload is kept
    Update {
        id: DepartmentId,
        #[command(flatten)]
        fields: DepartmentFields,
    },
    /// Show one department
    Show {
        /// Department ID or exact name
        department: String,
    },
    /// Remove a department
    Delete { id: DepartmentId },
    /// List departments
    List {
        /// Only departments handling this category
        #[arg(long)]
        category: Option<Category>,
        /// Only departments in this zone (needs --category)
        #[arg(long, requires = "category")]
        zone: Option<String>,
    },
}

#[derive(Args)]
struct DepartmentFields {
    name: String,
    #[arg(long)]
    email: String,
    /// Category handled (repeatable)
    #[arg(long = "category", required = true)]
    categories: Vec<Category>,
    #[arg(long)]
    zone: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    capacity: Option<i32>,
    #[command(flatten)]
    location: LocationArgs,
}

impl DepartmentFields {
    fn into_new_department(self) -> NewDepartment {
        let mut new = NewDepartment::new(self.name, self.email).categories(self.categories);
        if let Some(zone) = self.zone {
            new = new.zone(zone);
        }
        if let Some(phone) = self.phone {
            new = new.contact_phone(phone);
        }
        if let Some(endpoint) = self.endpoint {
            new = new.endpoint(endpoint);
        }
        if let Some(capacity) = self.capacity {
            new = new.capacity(capacity);
        }
        if let Some(location) = self.location.into_location() {
            new = new.location(location);
        }
        new
    }
}

#[derive(Subcommand)]
enum NotificationAction {
    /// Show a user's notifications, newest first
    List {
        /// User ID
        user: UserId,
        /// Only unread notifications
        #[arg(long, conflicts_with = "read")]
        unread: bool,
        /// Only read notifications
        #[arg(long)]
        read: bool,
    },
    /// Mark one notification read
    Read { id: uuid::Uuid },
    /// Mark all of a user's notifications read
    ReadAll { user: UserId },
    /// Count a user's unread notifications
    Unread { user: UserId },
}

#[derive(Subcommand)]
enum ComplaintAction {
    /// File a complaint
    File {
        title: String,
        #[arg(long)]
        category: Category,
        /// Reporter user ID
        #[arg(long)]
        reporter: UserId,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[command(flatten)]
        location: LocationArgs,
    },
    /// Show a complaint and its history
    Show {
        /// Complaint ID (full UUID or prefix)
        id: String,
    },
    /// List complaints, newest first
    List {
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        reporter: Option<UserId>,
        #[arg(long)]
        department: Option<DepartmentId>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = ComplaintFilter::DEFAULT_PAGE_SIZE)]
        size: u32,
    },
    /// Assign an open complaint to a department
    Assign {
        id: ComplaintId,
        department: DepartmentId,
        #[arg(long, default_value_t = UserId::SYSTEM)]
        actor: UserId,
        #[arg(long)]
        note: Option<String>,
    },
    /// Change a complaint's status
    Status {
        id: ComplaintId,
        status: Status,
        #[arg(long, default_value_t = UserId::SYSTEM)]
        actor: UserId,
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete a complaint (admin)
    Delete { id: ComplaintId },
}

#[derive(Args)]
struct LocationArgs {
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    address: Option<String>,
}

impl LocationArgs {
    fn into_location(self) -> Option<Location> {
        if self.lat.is_none() && self.address.is_none() {
            return None;
        }
        Some(Location {
            latitude: self.lat,
            longitude: self.lon,
            address: self.address,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            routing_config,
            visibility_timeout,
        } => cmd_serve(routing_config, visibility_timeout).await,
        Command::Department { action } => cmd_department(&connect().await?, action).await,
        Command::Complaint { action } => cmd_complaint(&connect().await?, action).await,
        Command::Notifications { action } => cmd_notifications(&connect().await?, action).await,
        Command::Route {
            category,
            zone,
            location,
        } => cmd_route(&connect().await?, category, zone, location).await,
    }
}

/// Connect, migrate and wire an [`App`] for a one-off command.
async fn connect() -> anyhow::Result<App> {
    let config = Config::from_env()?;
    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    let bus = PgmqBus::new(Arc::clone(&db));
    bus.ensure_queues().await?;
    Ok(App::build(db, Arc::new(bus), config.routing))
}

async fn cmd_serve(routing_config: Option<PathBuf>, visibility_timeout: i32) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "cityfix".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let routing = match &routing_config {
        Some(path) => RoutingConfig::load(path)?,
        None => config.routing.clone(),
    };

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    let bus = PgmqBus::new(Arc::clone(&db));
    bus.ensure_queues().await?;

    let app = App::build(Arc::clone(&db), Arc::new(bus), routing);
    let dispatcher = Dispatcher::new(
        db,
        Arc::clone(&app.relay),
        DispatcherConfig {
            visibility_timeout,
            ..DispatcherConfig::default()
        },
    );

    let ctrl = dispatcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    if let Some(path) = routing_config {
        reload_on_hangup(path, Arc::clone(&app.routing));
    }

    dispatcher.run().await?;
    Ok(())
}

/// Re-read the routing config whenever the process gets SIGHUP.
#[cfg(unix)]
fn reload_on_hangup(path: PathBuf, engine: Arc<RoutingEngine>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("cannot watch SIGHUP, routing config will not reload: {e}");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            match RoutingConfig::load(&path) {
                Ok(routing) => engine.reload(routing),
                Err(e) => tracing::error!("routing config reload failed: {e}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn reload_on_hangup(_path: PathBuf, _engine: Arc<RoutingEngine>) {}

async fn cmd_department(app: &App, action: DepartmentAction) -> anyhow::Result<()> {
    match action {
        DepartmentAction::Add { fields } => {
            let department = app
                .directory
                .create_department(fields.into_new_department())
                .await?;
            println!("Created: {} ({})", department.id, department.name);
        }
        DepartmentAction::Update { id, fields } => {
            let department = app
                .directory
                .update_department(id, fields.into_new_department())
                .await?;
            println!("Updated: {} ({})", department.id, department.name);
        }
        DepartmentAction::Show { department } => {
            let found = match department.parse::<DepartmentId>() {
                Ok(id) => app.directory.find_by_id(id).await?,
                Err(_) => app.directory.find_by_name(&department).await?,
            };
            let department =
                found.with_context(|| format!("no department matching '{department}'"))?;
            print_department(&department);
        }
        DepartmentAction::Delete { id } => {
            app.directory.delete_department(id).await?;
            println!("Deleted: {id}");
        }
        DepartmentAction::List { category, zone } => {
            let departments = match (category, zone) {
                (Some(c), Some(z)) => app.directory.find_by_category_and_zone(c, &z).await?,
                (Some(c), None) => app.directory.find_by_category(c).await?,
                _ => app.directory.list_departments().await?,
            };
            if departments.is_empty() {
                println!("No departments found.");
                return Ok(());
            }

            println!(
                "{:<36}  {:<24}  {:<10}  {:<8}  CATEGORIES",
                "ID", "NAME", "ZONE", "LOAD"
            );
            println!("{}", "-".repeat(100));
            for d in &departments {
                let categories: Vec<&str> = d.categories.iter().map(|c| c.as_str()).collect();
                let load = match d.capacity {
                    Some(cap) => format!("{}/{cap}", d.workload()),
                    None => d.workload().to_string(),
                };
                println!(
                    "{:<36}  {:<24}  {:<10}  {:<8}  {}",
                    d.id,
                    d.name,
                    d.zone.as_deref().unwrap_or("-"),
                    load,
                    categories.join(",")
                );
            }
            println!("\n{} department(s)", departments.len());
        }
    }
    Ok(())
}

async fn cmd_complaint(app: &App, action: ComplaintAction) -> anyhow::Result<()> {
    match action {
        ComplaintAction::File {
            title,
            category,
            reporter,
            description,
            priority,
            location,
        } => {
            let mut new = NewComplaint::new(title, category, reporter)
                .description(description)
                .priority(priority);
            if let Some(location) = location.into_location() {
                new = new.location(location);
            }
            let complaint = app.complaints.file(new).await?;
            println!("Filed: {} (status: {})", complaint.id, complaint.status);
        }
        ComplaintAction::Show { id } => {
            let id = resolve_complaint_id(app, &id).await?;
            print_complaint(&app.complaints.get(id).await?);
        }
        ComplaintAction::List {
            status,
            category,
            reporter,
            department,
            page,
            size,
        } => {
            let filter = ComplaintFilter {
                status,
                category,
                reported_by: reporter,
                assigned_to: department,
                page: Some(page),
                size: Some(size),
            };
            let complaints = app.complaints.search(&filter).await?;
            if complaints.is_empty() {
                println!("No complaints found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<12}  {:<11}  {:<8}  {:<30}  CREATED",
                "ID", "CATEGORY", "STATUS", "PRIORITY", "TITLE"
            );
            println!("{}", "-".repeat(100));
            for c in &complaints {
                let short_id = &c.id.to_string()[..8];
                let title: String = c.title.chars().take(30).collect();
                println!(
                    "{:<8}  {:<12}  {:<11}  {:<8}  {:<30}  {}",
                    short_id,
                    c.category,
                    c.status,
                    c.priority,
                    title,
                    c.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!("\n{} complaint(s)", complaints.len());
        }
        ComplaintAction::Assign {
            id,
            department,
            actor,
            note,
        } => {
            let complaint = app
                .complaints
                .assign(id, department, actor, note.as_deref())
                .await?;
            println!("Assigned: {} → {department}", complaint.id);
        }
        ComplaintAction::Status {
            id,
            status,
            actor,
            note,
        } => {
            let complaint = app
                .complaints
                .transition(id, status, actor, note.as_deref())
                .await?;
            println!("Updated: {} (status: {})", complaint.id, complaint.status);
        }
        ComplaintAction::Delete { id } => {
            app.complaints.delete(id).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn cmd_notifications(app: &App, action: NotificationAction) -> anyhow::Result<()> {
    match action {
        NotificationAction::List { user, unread, read } => {
            let filter = match (unread, read) {
                (true, _) => Some(false),
                (_, true) => Some(true),
                _ => None,
            };
            let notifications = app.notifications.notifications_for_user(user, filter).await?;
            if notifications.is_empty() {
                println!("No notifications.");
                return Ok(());
            }
            for n in &notifications {
                println!(
                    "{}  {} {} [{}] {}: {}",
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.id,
                    if n.read { " " } else { "*" },
                    n.channel.as_str(),
                    n.title,
                    n.message
                );
            }
        }
        NotificationAction::Read { id } => {
            let n = app.notifications.mark_read(id).await?;
            println!("Read: {} ({})", n.id, n.title);
        }
        NotificationAction::ReadAll { user } => {
            let changed = app.notifications.mark_all_read(user).await?;
            println!("Marked {changed} notification(s) read");
        }
        NotificationAction::Unread { user } => {
            println!("{}", app.notifications.count_unread(user).await?);
        }
    }
    Ok(())
}

async fn cmd_route(
    app: &App,
    category: Category,
    zone: Option<String>,
    location: LocationArgs,
) -> anyhow::Result<()> {
    let mut query = RoutingQuery::new(category);
    if let Some(zone) = zone {
        query = query.zone(zone);
    }
    if let Some(location) = location.into_location() {
        query = query.location(location);
    }

    let decision = app.routing.route(&query).await;
    match decision.department() {
        Some(d) => println!(
            "{}: {} ({}) zone={} contact={}",
            decision.outcome(),
            d.name,
            d.department_id,
            d.zone.as_deref().unwrap_or("-"),
            d.contact_email
        ),
        None => println!("unassigned: no department can take this complaint"),
    }
    Ok(())
}

/// Accept a full UUID or a unique prefix among recent complaints.
async fn resolve_complaint_id(app: &App, id_str: &str) -> anyhow::Result<ComplaintId> {
    if id_str.len() >= 36 {
        return Ok(id_str.parse()?);
    }
    let recent = app
        .complaints
        .search(&ComplaintFilter {
            size: Some(100),
            ..ComplaintFilter::default()
        })
        .await?;
    let matches: Vec<_> = recent
        .iter()
        .filter(|c| c.id.to_string().starts_with(id_str))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no complaint matching prefix '{id_str}'"),
        1 => Ok(matches[0].id),
        n => anyhow::bail!("{n} complaints match prefix '{id_str}', be more specific"),
    }
}

fn print_department(d: &Department) {
    let categories: Vec<&str> = d.categories.iter().map(|c| c.as_str()).collect();
    println!("ID:          {}", d.id);
    println!("Name:        {}", d.name);
    println!("Categories:  {}", categories.join(","));
    println!("Zone:        {}", d.zone.as_deref().unwrap_or("-"));
    println!("Email:       {}", d.contact_email);
    if let Some(ref phone) = d.contact_phone {
        println!("Phone:       {phone}");
    }
    if let Some(ref endpoint) = d.endpoint {
        println!("Endpoint:    {endpoint}");
    }
    if let Some((lat, lon)) = d.location.as_ref().and_then(Location::coordinates) {
        println!("Location:    {lat:.5}, {lon:.5}");
    }
    match d.capacity {
        Some(cap) => println!("Workload:    {}/{cap}", d.workload()),
        None => println!("Workload:    {}", d.workload()),
    }
    println!("Created:     {}", d.created_at);
    println!("Updated:     {}", d.updated_at);
}

fn print_complaint(c: &Complaint) {
    println!("ID:          {}", c.id);
    println!("Title:       {}", c.title);
    if !c.description.is_empty() {
        println!("Description: {}", c.description);
    }
    println!("Category:    {}", c.category);
    println!("Priority:    {}", c.priority);
    println!("Status:      {}", c.status);
    println!("Reporter:    {}", c.reported_by);
    println!(
        "Assigned To: {}",
        c.assigned_to
            .map(|d| d.to_string())
            .unwrap_or("-".to_string())
    );
    if let Some((lat, lon)) = c.location.coordinates() {
        println!("Location:    {lat:.5}, {lon:.5}");
    }
    if let Some(ref address) = c.location.address {
        println!("Address:     {address}");
    }
    println!("Created:     {}", c.created_at);
    println!("Updated:     {}", c.updated_at);
    println!("---");
    for entry in &c.history {
        let from = entry.old_status.map_or("-", Status::as_str);
        println!(
            "{}  {:>11} → {:<11}  by {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            from,
            entry.new_status.as_str(),
            entry.changed_by,
            entry
                .note
                .as_deref()
                .map(|n| format!("  ({n})"))
                .unwrap_or_default()
        );
    }
}

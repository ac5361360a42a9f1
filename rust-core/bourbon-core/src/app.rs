//! # Application
//!
//! Wires configuration, routes, middleware, the database and migrations
//! into a runnable [`Server`].
//!
//! ```ignore
//! let mut app = Application::from_config_file("settings.toml")?;
//! app.get("/health", handler(|_ctx| async { Ok(Response::text("ok")) }))?;
//! app.run().await?;
//! ```

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::context::Handler;
use crate::database::{DatabasePool, Dialect};
use crate::error::{Error, Result};
use crate::error_store::ErrorStore;
use crate::middleware::{Middleware, MiddlewareRegistry};
use crate::migrate::{generator, Migration, MigrationGenerator, MigrationRegistry, Migrator, StateStore};
use crate::route::join_paths;
use crate::router::Method;
use crate::server::Server;
use crate::state::AppState;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A Bourbon application
pub struct Application {
    config: Config,
    server: Server,
    middleware: MiddlewareRegistry,
    state: AppState,
    db: Option<DatabasePool>,
    error_store: Option<ErrorStore>,
    migrations: MigrationRegistry,
}

impl Application {
    /// Application for `config`
    #[must_use]
    pub fn new(config: Config) -> Self {
        let server = Server::new(&config.app.secret_key);
        Self {
            config,
            server,
            middleware: MiddlewareRegistry::new(),
            state: AppState::new(),
            db: None,
            error_store: None,
            migrations: MigrationRegistry::new(),
        }
    }

    /// Load `path` (plus environment overrides) and build an application
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unreadable or malformed file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Config::load(path)?))
    }

    /// Load `settings.toml` from the working directory
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unreadable or malformed file.
    pub fn from_default_config() -> Result<Self> {
        Self::from_config_file(DEFAULT_CONFIG_FILE)
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Application state shared with every handler
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Connected database, if any
    #[must_use]
    pub const fn db(&self) -> Option<&DatabasePool> {
        self.db.as_ref()
    }

    /// Connect to the configured database
    ///
    /// SQLite parent directories are created as needed. With
    /// `logging.store_errors_db` the error table is created too.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unsupported driver and
    /// `Error::Database` when the connection fails.
    pub async fn connect_db(&mut self) -> Result<&DatabasePool> {
        let settings = &self.config.database;
        if settings.dialect()? == Dialect::Sqlite && settings.url.is_none() {
            if let Some(parent) = Path::new(&settings.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let db = DatabasePool::connect(&settings.url()?, Some(settings.max_connections)).await?;
        info!(driver = %db.dialect(), "Database connected");

        if self.config.logging.store_errors_db {
            let store = ErrorStore::new(db.clone());
            store.migrate().await?;
            self.error_store = Some(store);
        }
        Ok(self.db.insert(db))
    }

    /// Use an existing pool instead of connecting
    pub fn set_database(&mut self, db: DatabasePool) {
        self.db = Some(db);
    }

    /// Add `name` to the installed applications
    pub fn register_app(&mut self, name: &str) {
        if !self.config.apps.installed.iter().any(|a| a == name) {
            self.config.apps.installed.push(name.to_string());
        }
    }

    /// Installed applications; every directory under `apps_dir` when none
    /// are configured
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the apps directory cannot be listed.
    pub fn apps(&self) -> Result<Vec<String>> {
        if self.config.apps.installed.is_empty() {
            generator::list_apps(&self.config.migrations.apps_dir)
        } else {
            Ok(self.config.apps.installed.clone())
        }
    }

    /// Make a middleware available by name
    pub fn register_middleware<M: Middleware + 'static>(&mut self, name: &str, middleware: M) {
        self.middleware.register(name, middleware);
    }

    /// Append `name` to the enabled middleware list
    pub fn use_middleware(&mut self, name: &str) {
        self.config.middleware.enabled.push(name.to_string());
    }

    /// Register a route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed or conflicting
    /// patterns.
    pub fn route(&mut self, method: Method, path: &str, handler: Handler) -> Result<&mut Self> {
        self.server.add_route(method, path, handler, false)?;
        Ok(self)
    }

    /// Register a route that requires a valid JWT
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed or conflicting
    /// patterns.
    pub fn route_with_auth(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
    ) -> Result<&mut Self> {
        self.server.add_route(method, path, handler, true)?;
        Ok(self)
    }

    /// `GET` route
    ///
    /// # Errors
    ///
    /// See [`Application::route`].
    pub fn get(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Get, path, handler)
    }

    /// `POST` route
    ///
    /// # Errors
    ///
    /// See [`Application::route`].
    pub fn post(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Post, path, handler)
    }

    /// `PUT` route
    ///
    /// # Errors
    ///
    /// See [`Application::route`].
    pub fn put(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Put, path, handler)
    }

    /// `PATCH` route
    ///
    /// # Errors
    ///
    /// See [`Application::route`].
    pub fn patch(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Patch, path, handler)
    }

    /// `DELETE` route
    ///
    /// # Errors
    ///
    /// See [`Application::route`].
    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Delete, path, handler)
    }

    /// Routes sharing `prefix`
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            app: self,
            prefix: prefix.to_string(),
            auth_required: false,
        }
    }

    /// Register a hand-written migration
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMigration` when the id is taken.
    pub fn register_migration(&mut self, migration: impl Migration + 'static) -> Result<()> {
        self.migrations.register(migration)
    }

    /// Register every migration file of the installed applications
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMigrationFile` or `Error::DuplicateMigration`
    /// for a bad file.
    pub fn discover_migrations(&mut self) -> Result<usize> {
        let apps = self.apps()?;
        let found = self
            .migrations
            .discover_sql(&self.config.migrations.apps_dir, apps.as_slice())?;
        debug!(found, "Migrations discovered");
        Ok(found)
    }

    /// Registered migrations
    #[must_use]
    pub const fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Migrator over the connected database
    ///
    /// # Errors
    ///
    /// Returns `Error::DatabaseNotConnected` before [`Application::connect_db`].
    pub fn migrator(&self) -> Result<Migrator> {
        let db = self.db.clone().ok_or(Error::DatabaseNotConnected)?;
        Ok(Migrator::new(db, self.migrations.clone()))
    }

    /// Migration generator for the configured apps directory and dialect
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unsupported driver.
    pub fn generator(&self) -> Result<MigrationGenerator> {
        let settings = &self.config.migrations;
        Ok(MigrationGenerator::new(
            settings.apps_dir.clone(),
            StateStore::new(settings.state_path.clone()),
            self.config.database.dialect()?,
        ))
    }

    /// Finish configuration and produce the server
    ///
    /// # Errors
    ///
    /// Returns `Error::MiddlewareNotRegistered` for an unknown enabled
    /// middleware and `Error::Config` for an invalid bind address.
    pub fn build_server(self) -> Result<Server> {
        let mut registry = MiddlewareRegistry::with_builtins(
            &self.config.security.cors_origins,
            self.error_store.as_ref(),
        );
        registry.extend(self.middleware);
        let chain = registry.chain(self.config.middleware.enabled.as_slice())?;
        debug!(middleware = ?chain.names(), "Middleware chain built");

        let address: SocketAddr =
            self.config
                .server
                .address()
                .parse()
                .map_err(|e| Error::Config {
                    message: format!("invalid server address {}: {e}", self.config.server.address()),
                })?;

        let mut server = self.server.bind(address);
        server.set_middleware(chain);
        server.set_max_body_size(self.config.server.max_body_size);
        server.set_shutdown_timeout(Duration::from_secs(self.config.server.shutdown_timeout));
        server.set_state(self.state);
        if let Some(db) = self.db {
            server.set_database(db);
        }
        Ok(server)
    }

    /// Initialise logging, connect the database and serve until shutdown
    ///
    /// # Errors
    ///
    /// Propagates logging, database, configuration and bind errors.
    pub async fn run(mut self) -> Result<()> {
        crate::logging::init(&self.config.logging, self.config.app.debug)?;
        info!(
            app = %self.config.app.name,
            env = %self.config.app.env,
            "Starting application"
        );
        if self.db.is_none() {
            self.connect_db().await?;
        }
        let db = self.db.clone();

        let server = self.build_server()?;
        let result = server.serve().await;
        if let Some(db) = db {
            db.close().await;
        }
        result
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("app", &self.config.app.name)
            .field("middleware", &self.middleware)
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

/// Routes under a common prefix
pub struct RouteGroup<'a> {
    app: &'a mut Application,
    prefix: String,
    auth_required: bool,
}

impl RouteGroup<'_> {
    /// Require a valid JWT on every route added afterwards
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Register a route under the prefix
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed or conflicting
    /// patterns.
    pub fn route(&mut self, method: Method, path: &str, handler: Handler) -> Result<&mut Self> {
        let full = join_paths(&self.prefix, path);
        self.app
            .server
            .add_route(method, &full, handler, self.auth_required)?;
        Ok(self)
    }

    /// `GET` route under the prefix
    ///
    /// # Errors
    ///
    /// See [`RouteGroup::route`].
    pub fn get(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Get, path, handler)
    }

    /// `POST` route under the prefix
    ///
    /// # Errors
    ///
    /// See [`RouteGroup::route`].
    pub fn post(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Post, path, handler)
    }

    /// `PUT` route under the prefix
    ///
    /// # Errors
    ///
    /// See [`RouteGroup::route`].
    pub fn put(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Put, path, handler)
    }

    /// `PATCH` route under the prefix
    ///
    /// # Errors
    ///
    /// See [`RouteGroup::route`].
    pub fn patch(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Patch, path, handler)
    }

    /// `DELETE` route under the prefix
    ///
    /// # Errors
    ///
    /// See [`RouteGroup::route`].
    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<&mut Self> {
        self.route(Method::Delete, path, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{handler, Context};
    use crate::response::Response;
    use std::collections::HashMap;

    fn app() -> Application {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        Application::new(config)
    }

    fn ok() -> Handler {
        handler(|ctx: Context| async move { Ok(Response::text(ctx.request.path.clone())) })
    }

    #[tokio::test]
    async fn test_group_prefixes_routes() {
        let mut app = app();
        app.get("/health", ok()).unwrap();
        app.group("/api/v1").get("/users", ok()).unwrap();

        let server = app.build_server().unwrap();
        let resp = server
            .test_request(Method::Get, "/api/v1/users", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "/api/v1/users");
    }

    #[test]
    fn test_unknown_middleware_fails_build() {
        let mut app = app();
        app.use_middleware("Compression");
        assert!(matches!(
            app.build_server(),
            Err(Error::MiddlewareNotRegistered { ref name }) if name == "Compression"
        ));
    }

    #[tokio::test]
    async fn test_custom_middleware_by_name() {
        struct Stamp;
        impl Middleware for Stamp {
            fn after_response(&self, _req: &crate::request::Request, res: &mut Response) {
                res.set_header("X-Stamp", "1");
            }
            fn name(&self) -> &'static str {
                "Stamp"
            }
        }

        let mut app = app();
        app.register_middleware("stamp", Stamp);
        app.use_middleware("Stamp");
        app.get("/", ok()).unwrap();

        let server = app.build_server().unwrap();
        let resp = server
            .test_request(Method::Get, "/", HashMap::new(), None)
            .await;
        assert_eq!(resp.header("X-Stamp"), Some("1"));
    }

    #[test]
    fn test_migrator_requires_database() {
        assert!(matches!(app().migrator(), Err(Error::DatabaseNotConnected)));
    }

    #[test]
    fn test_register_app_once() {
        let mut app = app();
        app.register_app("blog");
        app.register_app("blog");
        assert_eq!(app.apps().unwrap(), vec!["blog".to_string()]);
    }
}

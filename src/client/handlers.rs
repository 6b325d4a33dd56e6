use std::{collections::HashSet, io, sync::Arc};

use crossterm::event::KeyCode;
use log::{error, info};

use crate::{backup::BackupInfo, models::connections::Environment, DbManager};

use super::{
    screens,
    tui::{ConnectionForm, ReplicationUI, ScreenState, Term, MENU_ITEMS},
};

const BACKUPS_TO_KEEP: usize = 10;

fn move_up(selected: &mut usize) {
    if *selected > 0 {
        *selected -= 1;
    }
}

fn move_down(selected: &mut usize, len: usize) {
    if len > 0 && *selected < len - 1 {
        *selected += 1;
    }
}

impl ReplicationUI {
    pub async fn handle_main_menu_input(&mut self, key: KeyCode, terminal: &mut Term) -> io::Result<()> {
        match key {
            KeyCode::Up => move_up(&mut self.selected_menu),
            KeyCode::Down => move_down(&mut self.selected_menu, MENU_ITEMS.len()),
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Enter => match self.selected_menu {
                0 => self.analyze(terminal).await?,
                1 => self.current_screen = ScreenState::ConfirmReplication,
                2 => self.open_backups(),
                3 => self.open_maintained_tables(terminal).await?,
                4 => self.test_connections(terminal).await?,
                5 => self.open_configuration(),
                _ => self.should_quit = true,
            },
            _ => {}
        }
        Ok(())
    }

    pub fn handle_back_input(&mut self, key: KeyCode) {
        if matches!(key, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
            self.current_screen = ScreenState::MainMenu;
        }
    }

    pub async fn handle_confirm_input(&mut self, key: KeyCode, terminal: &mut Term) -> io::Result<()> {
        match key {
            KeyCode::Char('y') => self.run_replication(true, terminal).await?,
            KeyCode::Char('n') => self.run_replication(false, terminal).await?,
            KeyCode::Esc => self.current_screen = ScreenState::MainMenu,
            _ => {}
        }
        Ok(())
    }

    pub async fn handle_backups_input(&mut self, key: KeyCode, terminal: &mut Term) -> io::Result<()> {
        match key {
            KeyCode::Up => move_up(&mut self.selected_backup),
            KeyCode::Down => move_down(&mut self.selected_backup, self.backup_list.len()),
            KeyCode::Char('p') => self.create_backup(Environment::Production, terminal).await?,
            KeyCode::Char('d') => self.create_backup(Environment::Development, terminal).await?,
            KeyCode::Delete | KeyCode::Char('x') => self.delete_selected_backup(),
            KeyCode::Char('c') => match self.backups.cleanup_old_backups(BACKUPS_TO_KEEP) {
                Ok(removed) => {
                    self.refresh_backups();
                    self.show_message(
                        format!("Removed {} old backups", removed),
                        ScreenState::Backups,
                    );
                }
                Err(e) => self.show_message(e.to_string(), ScreenState::Backups),
            },
            KeyCode::Esc | KeyCode::Char('q') => self.current_screen = ScreenState::MainMenu,
            _ => {}
        }
        Ok(())
    }

    pub fn handle_maintained_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Up => move_up(&mut self.selected_table),
            KeyCode::Down => move_down(&mut self.selected_table, self.tables.len()),
            KeyCode::Char(' ') => {
                let Some(table) = self.tables.get(self.selected_table).cloned() else {
                    return;
                };
                if let Err(e) = self.config.toggle_maintained_table(&table) {
                    error!("Could not update maintained tables: {}", e);
                    self.show_message(e.to_string(), ScreenState::MaintainedTables);
                }
            }
            KeyCode::Char('a') => self.replace_maintained_tables(self.tables.clone()),
            KeyCode::Char('c') => self.replace_maintained_tables(Vec::new()),
            KeyCode::Esc | KeyCode::Char('q') => self.current_screen = ScreenState::MainMenu,
            _ => {}
        }
    }

    fn replace_maintained_tables(&mut self, tables: Vec<String>) {
        if let Err(e) = self.config.set_maintained_tables(tables) {
            error!("Could not update maintained tables: {}", e);
            self.show_message(e.to_string(), ScreenState::MaintainedTables);
        }
    }

    pub fn handle_configuration_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Up => move_up(&mut self.selected_environment),
            KeyCode::Down => move_down(&mut self.selected_environment, self.environments.len()),
            KeyCode::Enter => {
                if let Some(name) = self.environments.get(self.selected_environment) {
                    self.connection_form = Some(ConnectionForm::new(name));
                    self.current_screen = ScreenState::EditConnection;
                }
            }
            KeyCode::Esc | KeyCode::Char('q') => self.current_screen = ScreenState::MainMenu,
            _ => {}
        }
    }

    pub fn handle_edit_connection_input(&mut self, key: KeyCode) {
        let Some(form) = self.connection_form.as_mut() else {
            self.current_screen = ScreenState::Configuration;
            return;
        };
        match key {
            KeyCode::Esc => {
                self.connection_form = None;
                self.current_screen = ScreenState::Configuration;
            }
            KeyCode::Char(c) => form.push(c),
            KeyCode::Backspace => form.pop(),
            KeyCode::Enter | KeyCode::Tab => {
                if !form.advance() {
                    self.save_connection();
                }
            }
            _ => {}
        }
    }

    fn open_configuration(&mut self) {
        let mut names: Vec<String> = [Environment::Development, Environment::Production]
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        for name in self.config.environments() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        self.environments = names;
        self.selected_environment = self
            .selected_environment
            .min(self.environments.len().saturating_sub(1));
        self.current_screen = ScreenState::Configuration;
    }

    /// Writes the form to the configuration file and reconnects both
    /// environments with the new settings.
    fn save_connection(&mut self) {
        let Some(form) = self.connection_form.take() else {
            return;
        };
        if let Err(e) = self
            .config
            .update_environment(&form.environment, &form.to_update())
        {
            error!("Could not save {} settings: {}", form.environment, e);
            self.show_message(e.to_string(), ScreenState::Configuration);
            return;
        }
        info!("Updated {} connection settings", form.environment);

        match DbManager::from_config(&self.config) {
            Ok(manager) => {
                self.db_manager = Arc::new(manager);
                self.show_message(
                    format!("Saved {} settings", form.environment),
                    ScreenState::Configuration,
                );
            }
            Err(e) => {
                error!("Saved settings are incomplete: {}", e);
                self.show_message(
                    format!("Saved, but the connections were not rebuilt: {}", e),
                    ScreenState::Configuration,
                );
            }
        }
    }

    fn data_tables(&self) -> HashSet<String> {
        self.config.maintained_tables().iter().cloned().collect()
    }

    async fn refresh_tables(&mut self) -> bool {
        match self.db_manager.source_tables().await {
            Ok(tables) => {
                self.tables = tables;
                self.selected_table = self.selected_table.min(self.tables.len().saturating_sub(1));
                true
            }
            Err(e) => {
                error!("Could not list source tables: {}", e);
                self.show_message(
                    format!("Could not list development tables: {}", e),
                    ScreenState::MainMenu,
                );
                false
            }
        }
    }

    async fn analyze(&mut self, terminal: &mut Term) -> io::Result<()> {
        screens::render_busy(terminal, "Analyzing tables...")?;
        if !self.refresh_tables().await {
            return Ok(());
        }

        let data_tables = self.data_tables();
        let analysis = self
            .db_manager
            .replicator()
            .analyze(&self.tables, &data_tables)
            .await;
        match analysis {
            Ok(analysis) => {
                self.analysis = Some(analysis);
                self.current_screen = ScreenState::Analysis;
            }
            Err(e) => self.show_message(e.to_string(), ScreenState::MainMenu),
        }
        Ok(())
    }

    async fn run_replication(&mut self, with_backup: bool, terminal: &mut Term) -> io::Result<()> {
        screens::render_busy(terminal, "Replicating development into production...")?;
        if !self.refresh_tables().await {
            return Ok(());
        }

        let data_tables = self.data_tables();
        let backup = with_backup.then_some(&self.backups);
        info!(
            "Starting full replication of {} tables (backup: {})",
            self.tables.len(),
            with_backup
        );

        let outcome = self
            .db_manager
            .replicator()
            .full_replication(&self.tables, &data_tables, backup)
            .await;
        match outcome {
            Ok(result) => {
                self.report = Some(result);
                self.current_screen = ScreenState::Report;
            }
            Err(e) => {
                error!("Replication failed: {}", e);
                self.show_message(e.to_string(), ScreenState::MainMenu);
            }
        }
        Ok(())
    }

    async fn test_connections(&mut self, terminal: &mut Term) -> io::Result<()> {
        screens::render_busy(terminal, "Testing connections...")?;
        let outcome = self.db_manager.replicator().test_connections().await;
        let message = match outcome {
            Ok(()) => "Both environments are reachable".to_string(),
            Err(e) => e.to_string(),
        };
        self.show_message(message, ScreenState::MainMenu);
        Ok(())
    }

    fn open_backups(&mut self) {
        self.refresh_backups();
        self.current_screen = ScreenState::Backups;
    }

    fn refresh_backups(&mut self) {
        match self.backups.list_backups() {
            Ok(list) => self.backup_list = list,
            Err(e) => {
                error!("Could not list backups: {}", e);
                self.backup_list.clear();
            }
        }
        self.selected_backup = self.selected_backup.min(self.backup_list.len().saturating_sub(1));
    }

    async fn create_backup(&mut self, environment: Environment, terminal: &mut Term) -> io::Result<()> {
        screens::render_busy(terminal, &format!("Backing up {}...", environment.name()))?;

        let database = match self.config.environment(environment.name()) {
            Ok(config) => config.database.clone(),
            Err(e) => {
                self.show_message(e.to_string(), ScreenState::Backups);
                return Ok(());
            }
        };

        let result = self
            .backups
            .create_backup(
                self.db_manager.client(environment),
                environment.name(),
                &database,
                None,
            )
            .await;

        self.refresh_backups();
        match result {
            Ok(name) => self.show_message(format!("Backup created: {}", name), ScreenState::Backups),
            Err(e) => self.show_message(e.to_string(), ScreenState::Backups),
        }
        Ok(())
    }

    fn delete_selected_backup(&mut self) {
        let Some(BackupInfo { name, .. }) = self.backup_list.get(self.selected_backup).cloned() else {
            return;
        };
        match self.backups.delete_backup(&name) {
            Ok(_) => {
                self.refresh_backups();
                self.show_message(format!("Backup {} removed", name), ScreenState::Backups);
            }
            Err(e) => self.show_message(e.to_string(), ScreenState::Backups),
        }
    }

    async fn open_maintained_tables(&mut self, terminal: &mut Term) -> io::Result<()> {
        screens::render_busy(terminal, "Loading tables...")?;
        if self.refresh_tables().await {
            self.current_screen = ScreenState::MaintainedTables;
        }
        Ok(())
    }
}

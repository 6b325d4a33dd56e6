use std::{io, sync::Arc};

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::{
    backup::{BackupInfo, BackupManager},
    config::AppConfig,
    models::{connections::ConnectionUpdate, plan::Analysis},
    replication::executor::ExecutionResult,
    DbManager,
};

use super::screens;

pub type Term = Terminal<CrosstermBackend<io::Stdout>>;

pub const MENU_ITEMS: [&str; 7] = [
    "Analyze replication",
    "Run full replication",
    "Backups",
    "Maintained tables",
    "Test connections",
    "Configuration",
    "Quit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    MainMenu,
    Analysis,
    ConfirmReplication,
    Report,
    Backups,
    MaintainedTables,
    Configuration,
    EditConnection,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Server,
    Database,
    User,
    Password,
}

impl FormField {
    pub const ALL: [FormField; 4] = [
        FormField::Server,
        FormField::Database,
        FormField::User,
        FormField::Password,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FormField::Server => "Server",
            FormField::Database => "Database",
            FormField::User => "User",
            FormField::Password => "Password",
        }
    }
}

/// Connection fields typed for one environment. Blank fields keep their
/// configured value.
#[derive(Debug, Clone)]
pub struct ConnectionForm {
    pub environment: String,
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub current_field: FormField,
}

impl ConnectionForm {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            server: String::new(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            current_field: FormField::Server,
        }
    }

    pub fn value(&self, field: FormField) -> &str {
        match field {
            FormField::Server => &self.server,
            FormField::Database => &self.database,
            FormField::User => &self.user,
            FormField::Password => &self.password,
        }
    }

    fn current_value_mut(&mut self) -> &mut String {
        match self.current_field {
            FormField::Server => &mut self.server,
            FormField::Database => &mut self.database,
            FormField::User => &mut self.user,
            FormField::Password => &mut self.password,
        }
    }

    pub fn push(&mut self, c: char) {
        self.current_value_mut().push(c);
    }

    pub fn pop(&mut self) {
        self.current_value_mut().pop();
    }

    /// Moves to the next field. Returns `false` when already on the last one.
    pub fn advance(&mut self) -> bool {
        let index = FormField::ALL
            .iter()
            .position(|f| *f == self.current_field)
            .unwrap_or_default();
        match FormField::ALL.get(index + 1) {
            Some(next) => {
                self.current_field = *next;
                true
            }
            None => false,
        }
    }

    pub fn to_update(&self) -> ConnectionUpdate {
        let field = |value: &str| (!value.is_empty()).then(|| value.to_string());
        ConnectionUpdate {
            server: field(&self.server),
            database: field(&self.database),
            user: field(&self.user),
            password: field(&self.password),
        }
    }
}

pub struct ReplicationUI {
    pub db_manager: Arc<DbManager>,
    pub config: AppConfig,
    pub backups: BackupManager,
    pub current_screen: ScreenState,
    /// Screen to return to when the message popup is dismissed.
    pub previous_screen: ScreenState,
    pub selected_menu: usize,
    pub tables: Vec<String>,
    pub selected_table: usize,
    pub analysis: Option<Analysis>,
    pub report: Option<ExecutionResult>,
    pub backup_list: Vec<BackupInfo>,
    pub selected_backup: usize,
    pub environments: Vec<String>,
    pub selected_environment: usize,
    pub connection_form: Option<ConnectionForm>,
    pub message: String,
    pub should_quit: bool,
}

impl ReplicationUI {
    pub fn new(db_manager: Arc<DbManager>, config: AppConfig, backups: BackupManager) -> Self {
        Self {
            db_manager,
            config,
            backups,
            current_screen: ScreenState::MainMenu,
            previous_screen: ScreenState::MainMenu,
            selected_menu: 0,
            tables: Vec::new(),
            selected_table: 0,
            analysis: None,
            report: None,
            backup_list: Vec::new(),
            selected_backup: 0,
            environments: Vec::new(),
            selected_environment: 0,
            connection_form: None,
            message: String::new(),
            should_quit: false,
        }
    }

    pub fn show_message(&mut self, message: impl Into<String>, return_to: ScreenState) {
        self.message = message.into();
        self.previous_screen = return_to;
        self.current_screen = ScreenState::Message;
    }

    pub async fn run_ui(&mut self) -> Result<(), io::Error> {
        let _guard = TerminalGuard;
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.ui_loop(&mut terminal).await;

        terminal.show_cursor()?;

        result
    }

    async fn ui_loop(&mut self, terminal: &mut Term) -> io::Result<()> {
        while !self.should_quit {
            match self.current_screen {
                ScreenState::MainMenu => screens::render_main_menu(self, terminal)?,
                ScreenState::Analysis => screens::render_analysis(self, terminal)?,
                ScreenState::ConfirmReplication => screens::render_confirm(self, terminal)?,
                ScreenState::Report => screens::render_report(self, terminal)?,
                ScreenState::Backups => screens::render_backups(self, terminal)?,
                ScreenState::MaintainedTables => screens::render_maintained_tables(self, terminal)?,
                ScreenState::Configuration => screens::render_configuration(self, terminal)?,
                ScreenState::EditConnection => screens::render_edit_connection(self, terminal)?,
                ScreenState::Message => screens::render_message(self, terminal)?,
            }

            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match self.current_screen {
                    ScreenState::MainMenu => self.handle_main_menu_input(key.code, terminal).await?,
                    ScreenState::Analysis | ScreenState::Report => {
                        self.handle_back_input(key.code)
                    }
                    ScreenState::ConfirmReplication => {
                        self.handle_confirm_input(key.code, terminal).await?
                    }
                    ScreenState::Backups => self.handle_backups_input(key.code, terminal).await?,
                    ScreenState::MaintainedTables => self.handle_maintained_input(key.code),
                    ScreenState::Configuration => self.handle_configuration_input(key.code),
                    ScreenState::EditConnection => self.handle_edit_connection_input(key.code),
                    ScreenState::Message => self.current_screen = self.previous_screen,
                }
            }
        }
        Ok(())
    }
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen, DisableMouseCapture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_walks_fields_and_keeps_blanks() {
        let mut form = ConnectionForm::new("production");
        for c in "db.internal:3307".chars() {
            form.push(c);
        }
        assert!(form.advance());
        assert!(form.advance());
        form.push('x');
        form.pop();
        assert!(form.advance());
        form.push('s');
        assert_eq!(form.current_field, FormField::Password);
        assert!(!form.advance());

        let update = form.to_update();
        assert_eq!(update.server.as_deref(), Some("db.internal:3307"));
        assert_eq!(update.database, None);
        assert_eq!(update.user, None);
        assert_eq!(update.password.as_deref(), Some("s"));
    }
}

//! The cooperative update loop: one tick at a time, no threads.
//!
//! Tick order is fixed: check termination, describe the screen (entering
//! or leaving the suspended state), drain commands, advance blink phases,
//! follow the cursor or pointer, autospeak, render, write. Only transport
//! reads and the inter-tick delay ever block, and both are bounded.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use core_braille::{BrailleDisplay, Driver, DriverError, DriverResult};
use core_clipboard::Clipboard;
use core_cmd::AlertSink;
use core_config::Preferences;
use core_dispatch::{DispatchEnv, Dispatcher, PollOutcome};
use core_render::{
    BlinkState, RenderContext, Renderer, StatusFlags, WindowLayout, fill_text_region, info_line,
    render_status_fields,
};
use core_screen::{FrozenScreen, Screen, ScreenDescription, Speech};
use core_session::{ContractionTrack, SessionMap, WindowDims, check_pointer, track_cursor};

use crate::autospeak::Autospeak;

/// Builds a fresh driver + display after a fatal transport failure.
pub type DriverFactory = Box<dyn FnMut() -> DriverResult<(Box<dyn Driver>, BrailleDisplay)>>;

pub struct UpdateLoop {
    pub driver: Box<dyn Driver>,
    pub brl: BrailleDisplay,
    driver_factory: DriverFactory,
    screen: Box<dyn Screen>,
    pub sessions: SessionMap,
    pub prefs: Preferences,
    prefs_path: PathBuf,
    pub clipboard: Clipboard,
    pub frozen: Option<FrozenScreen>,
    renderer: Renderer,
    blink: BlinkState,
    dispatcher: Dispatcher,
    contraction_track: ContractionTrack,
    autospeak: Autospeak,
    alerts: Box<dyn AlertSink>,
    speech: Box<dyn Speech>,
    pub info_mode: bool,
    update_interval: Duration,
    /// How long each chunk of a flashed message holds the display.
    message_delay: Duration,
    /// Monotonic tick time handed to autorepeat and blinkers.
    now: Duration,
    /// Window position at the end of the last tick.
    old_window: (usize, usize),
    is_suspended: bool,
    /// The last character mirror written, for inspection and API use.
    pub last_text: Vec<char>,
    terminate: Arc<AtomicBool>,
}

impl UpdateLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Box<dyn Driver>,
        brl: BrailleDisplay,
        driver_factory: DriverFactory,
        screen: Box<dyn Screen>,
        prefs: Preferences,
        prefs_path: PathBuf,
        alerts: Box<dyn AlertSink>,
        speech: Box<dyn Speech>,
        update_interval: Duration,
        message_delay: Duration,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        let blink = BlinkState::new(&prefs);
        Self {
            driver,
            brl,
            driver_factory,
            screen,
            sessions: SessionMap::new(),
            prefs,
            prefs_path,
            clipboard: Clipboard::new(),
            frozen: None,
            renderer: Renderer::default(),
            blink,
            dispatcher: Dispatcher::new(),
            contraction_track: ContractionTrack::default(),
            autospeak: Autospeak::new(),
            alerts,
            speech,
            info_mode: false,
            update_interval,
            message_delay,
            now: Duration::ZERO,
            old_window: (0, 0),
            is_suspended: false,
            last_text: Vec::new(),
            terminate,
        }
    }

    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    fn layout(&self) -> WindowLayout {
        WindowLayout::compute(
            self.brl.text_columns,
            self.brl.status_columns * self.brl.status_rows,
            &self.prefs,
        )
    }

    fn dims(&self) -> WindowDims {
        WindowDims::new(self.layout().text_count, self.brl.text_rows)
    }

    /// The description commands and rendering work against this tick.
    fn effective_description(&self) -> ScreenDescription {
        match &self.frozen {
            Some(snapshot) => snapshot.describe(),
            None => self.screen.describe(),
        }
    }

    /// Tear down and rebuild the driver after a fatal failure.
    fn restart_driver(&mut self) -> anyhow::Result<()> {
        tracing::warn!(target: "update.loop", "restarting braille driver");
        self.driver.destruct();
        let (driver, brl) = (self.driver_factory)().context("driver reconstruction")?;
        self.driver = driver;
        self.brl = brl;
        self.blink.reset(&self.prefs);
        self.dispatcher.reset_autorepeat();
        Ok(())
    }

    fn handle_driver_error(&mut self, error: DriverError) -> anyhow::Result<()> {
        if error.is_fatal() {
            tracing::warn!(target: "update.loop", %error, "fatal driver error");
            self.restart_driver()
        } else {
            tracing::debug!(target: "update.loop", %error, "transient driver error");
            Ok(())
        }
    }

    /// Write a short string across the whole window, truncated or padded
    /// to fit. Used for the unreadable-screen notice and messages.
    fn show_string(&mut self, text: &str) -> DriverResult<()> {
        let columns = self.brl.text_columns;
        let rows = self.brl.text_rows;
        let mut mirror = vec![' '; columns * rows];
        self.brl.buffer.iter_mut().for_each(|c| *c = 0);
        self.brl.cursor = None;
        let characters: Vec<char> = text.chars().collect();
        fill_text_region(
            &self.renderer.text_table,
            &mut mirror,
            &mut self.brl.buffer,
            0,
            columns,
            columns,
            rows,
            &characters,
        );
        self.driver.write_window(&mut self.brl, &mirror)?;
        self.last_text = mirror;
        Ok(())
    }

    /// Flash `text` on the display in window-sized chunks, holding each
    /// for `delay`. The termination flag is honoured between chunks.
    pub fn message(&mut self, text: &str, delay: Duration) -> DriverResult<()> {
        let window = self.brl.text_columns * self.brl.text_rows;
        let characters: Vec<char> = text.chars().collect();
        let chunks: Vec<&[char]> = if characters.is_empty() {
            vec![&[]]
        } else {
            characters.chunks(window.max(1)).collect()
        };
        for chunk in chunks {
            if self.should_terminate() {
                break;
            }
            let rendered: String = chunk.iter().collect();
            self.show_string(&rendered)?;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        Ok(())
    }

    /// One tick. Returns whether the loop should keep running.
    pub fn tick(&mut self) -> anyhow::Result<bool> {
        if self.should_terminate() {
            return Ok(false);
        }
        self.now += self.update_interval;

        // Screen first: unreadable screens suspend rendering and show the
        // back-end's own words instead. The driver stays up. A frozen
        // snapshot insulates review from live-screen outages.
        let live = self.screen.describe();
        if let Some(reason) = live.unreadable.clone().filter(|_| self.frozen.is_none()) {
            if !self.is_suspended {
                tracing::warn!(target: "update.loop", reason, "screen unreadable, suspending");
                self.is_suspended = true;
            }
            if let Err(error) = self.show_string(&reason) {
                self.handle_driver_error(error)?;
            }
            return Ok(true);
        }
        if self.is_suspended {
            tracing::info!(target: "update.loop", "screen readable again");
            self.is_suspended = false;
        }

        let mut scr = self.effective_description();
        let number = if scr.number < 0 {
            self.screen.current_virtual_terminal()
        } else {
            scr.number
        };

        // Drain the device: one command per poll until it runs dry.
        let mut restart = false;
        let mut message = None;
        loop {
            let layout = self.layout();
            let dims = WindowDims::new(layout.text_count, self.brl.text_rows);
            let ses = self.sessions.entry(number);
            ses.clamp_to(&scr, dims);

            let mut env = DispatchEnv {
                ses,
                scr: &scr,
                screen: self.screen.as_mut(),
                frozen: &mut self.frozen,
                prefs: &mut self.prefs,
                prefs_path: &self.prefs_path,
                clipboard: &mut self.clipboard,
                alerts: self.alerts.as_mut(),
                speech: self.speech.as_mut(),
                blink: &mut self.blink,
                contraction: &mut self.renderer.contraction,
                contraction_track: &mut self.contraction_track,
                layout,
                dims,
                text_table: &self.renderer.text_table,
                info_mode: &mut self.info_mode,
                full_shift: layout.text_count,
                half_shift: (layout.text_count / 2).max(1),
                vertical_shift: self.brl.text_rows.max(5),
                message: None,
            };

            let outcome =
                self.dispatcher
                    .poll(&mut *self.driver, &mut self.brl, &mut env, self.now);
            if env.message.is_some() {
                message = env.message.take();
            }
            match outcome {
                Ok(PollOutcome::Idle) => break,
                Ok(PollOutcome::Handled) => {
                    // Commands can freeze/unfreeze or switch screens.
                    scr = self.effective_description();
                }
                Ok(PollOutcome::RestartRequested) => {
                    restart = true;
                    break;
                }
                Err(error) => {
                    self.handle_driver_error(error)?;
                    break;
                }
            }
        }
        if restart {
            self.restart_driver()?;
            return Ok(true);
        }

        // Settle any routing request the commands kicked off.
        if self.prefs.alert_tunes {
            match self.screen.routing_status(false) {
                core_screen::RoutingStatus::None => {}
                core_screen::RoutingStatus::Done => {
                    self.alerts.alert(core_cmd::Alert::RoutingSucceeded)
                }
                _ => self.alerts.alert(core_cmd::Alert::RoutingFailed),
            }
        }

        self.blink.advance(&self.prefs, self.update_interval);

        let dims = self.dims();
        {
            // Cursor tracking and pointer following.
            let ses = self.sessions.entry(number);
            if ses.track_cursor && scr.cursor_ok() && !self.screen.is_routing() {
                if scr.posx != ses.trkx || scr.posy != ses.trky {
                    if self.prefs.blinking_cursor {
                        // Crossing lines hides the cursor so the text
                        // under it reads clean; lateral motion shows it.
                        if scr.posy != ses.trky {
                            self.blink.set_cursor(&self.prefs, false);
                        } else {
                            self.blink.set_cursor(&self.prefs, true);
                        }
                    }
                    let screen: &dyn Screen = match &self.frozen {
                        Some(snapshot) => snapshot,
                        None => self.screen.as_ref(),
                    };
                    track_cursor(
                        ses,
                        &scr,
                        screen,
                        &self.prefs,
                        dims,
                        &mut self.contraction_track,
                        false,
                    );
                    ses.trkx = scr.posx;
                    ses.trky = scr.posy;
                } else {
                    check_pointer(ses, self.screen.as_ref(), &self.prefs, dims);
                }
            }
        }

        if self.prefs.autospeak {
            let ses = self.sessions.entry(number);
            let screen: &dyn Screen = match &self.frozen {
                Some(snapshot) => snapshot,
                None => self.screen.as_ref(),
            };
            self.autospeak
                .check(&scr, screen, ses, self.speech.as_mut());
        }

        // Window-motion housekeeping.
        {
            let ses = self.sessions.entry(number);
            let window = (ses.winx, ses.winy);
            if window != self.old_window {
                if self.prefs.highlight_window {
                    let right = (window.0 + dims.text_count).min(scr.cols).saturating_sub(1);
                    let bottom = (window.1 + dims.text_rows).min(scr.rows).saturating_sub(1);
                    self.screen
                        .highlight_region(window.0, right, window.1, bottom);
                }
                if self.prefs.show_attributes && self.prefs.blinking_attributes {
                    self.blink.set_attributes(&self.prefs, true);
                }
                self.old_window = window;
            }
        }

        // A message produced by a command takes the window this tick.
        if let Some(text) = message {
            let delay = self.message_delay;
            if let Err(error) = self.message(&text, delay) {
                self.handle_driver_error(error)?;
            }
            return Ok(true);
        }

        if self.info_mode {
            let line = {
                let ses = self.sessions.entry(number);
                info_line(
                    ses,
                    &scr,
                    &self.prefs,
                    StatusFlags {
                        frozen: self.frozen.is_some(),
                        info_mode: true,
                    },
                )
            };
            if let Err(error) = self.show_string(&line) {
                self.handle_driver_error(error)?;
            }
            return Ok(true);
        }

        // Render and write the window.
        let layout = self.layout();
        let flags = StatusFlags {
            frozen: self.frozen.is_some(),
            info_mode: self.info_mode,
        };
        let text = {
            let screen: &dyn Screen = match &self.frozen {
                Some(snapshot) => snapshot,
                None => self.screen.as_ref(),
            };
            let ctx = RenderContext {
                scr: &scr,
                screen,
                prefs: &self.prefs,
                blink: &self.blink,
                layout,
                flags,
            };
            let ses = self.sessions.entry(number);
            self.renderer
                .render_window(&ctx, ses, &mut self.contraction_track, &mut self.brl)
        };

        let mut write_result = self.driver.write_window(&mut self.brl, &text);
        if write_result.is_ok() && self.brl.status_columns > 0 {
            let cells = {
                let ses = self.sessions.entry(number);
                render_status_fields(&self.renderer.text_table, ses, &scr, &self.prefs, flags)
            };
            write_result = self.driver.write_status(&mut self.brl, &cells);
        }
        if let Err(error) = write_result {
            self.handle_driver_error(error)?;
        } else {
            self.last_text = text;
        }

        Ok(true)
    }

    /// Run until terminated, pacing ticks by the update interval plus
    /// whatever write delay the driver accumulated.
    pub fn run(&mut self) -> anyhow::Result<()> {
        while self.tick()? {
            let delay = self.update_interval + Duration::from_millis(self.brl.write_delay);
            self.brl.write_delay = 0;
            std::thread::sleep(delay);
        }
        tracing::info!(target: "update.loop", "terminated");
        Ok(())
    }
}

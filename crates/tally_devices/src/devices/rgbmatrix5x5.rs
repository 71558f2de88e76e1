//!Outputs for the Pimoroni 5x5 RGB Matrix.
//!
//![`Indicator`] fills the whole matrix with the color of one tally. [`Matrix`] shows five
//!consecutive tallies, one per row, with a column for each lamp.
//!
//!Displays are opened through a [`DisplayProvider`] so the outputs can run against
//![`MockDisplayProvider`] when no hardware is attached.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_core::{
    registry::{options_value, parse_options},
    BaseIo, ChangedProps, Input, IoCore, MatchTarget, MultiTallyConfig, OptionError, Output,
    OutputBindings, SingleTallyConfig, Tally, TallyColor, TallyError, TallyType, BROADCAST,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub const INDICATOR_NAMESPACE: &str = "output.rgbmatrix5x5.Indicator";
pub const MATRIX_NAMESPACE: &str = "output.rgbmatrix5x5.Matrix";

pub const WIDTH: usize = 5;
pub const HEIGHT: usize = 5;

pub type Rgb = (u8, u8, u8);

///`(x, y)` on the display.
pub type Pixel = (usize, usize);

pub fn color_rgb(color: TallyColor) -> Rgb {
    match color {
        TallyColor::Off => (0, 0, 0),
        TallyColor::Red => (255, 0, 0),
        TallyColor::Green => (0, 255, 0),
        TallyColor::Amber => (0xff, 0xbf, 0),
    }
}

///A pixel buffer that is pushed to the device on [`PixelDisplay::show`].
pub trait PixelDisplay: Send {
    fn set_pixel(&mut self, x: usize, y: usize, rgb: Rgb) -> Result<(), TallyError>;

    fn set_all(&mut self, rgb: Rgb) -> Result<(), TallyError>;

    ///Global brightness in `0.0..=1.0`.
    fn set_brightness(&mut self, brightness: f64) -> Result<(), TallyError>;

    fn show(&mut self) -> Result<(), TallyError>;

    fn clear(&mut self) -> Result<(), TallyError> {
        self.set_all((0, 0, 0))
    }
}

pub trait DisplayProvider: Send + Sync {
    ///The display is released when the returned value is dropped.
    fn open_display(&self) -> Result<Box<dyn PixelDisplay>, TallyError>;
}

///Provider used when no display driver is available. Every open fails.
pub struct NoDisplay;

impl DisplayProvider for NoDisplay {
    fn open_display(&self) -> Result<Box<dyn PixelDisplay>, TallyError> {
        Err(TallyError::device(
            "no rgbmatrix5x5 driver available, enable the mock display to run without one",
        ))
    }
}

///A snapshot of the mock display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockFrame {
    ///indexed `[y][x]`
    pub pixels: [[Rgb; WIDTH]; HEIGHT],
    pub brightness: f64,
}

#[derive(Default)]
struct MockDisplayState {
    open: bool,
    buffer: MockFrame,
    shown: MockFrame,
    show_count: usize,
}

///In-memory display. Clones share state, so a test can keep one to inspect what was shown.
#[derive(Clone, Default)]
pub struct MockDisplayProvider {
    state: Arc<Mutex<MockDisplayState>>,
}

fn lock_mock(state: &Mutex<MockDisplayState>) -> MutexGuard<'_, MockDisplayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDisplayProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        lock_mock(&self.state).open
    }

    ///What was on the display at the last `show`.
    pub fn shown(&self) -> MockFrame {
        lock_mock(&self.state).shown.clone()
    }

    pub fn pixel(&self, x: usize, y: usize) -> Rgb {
        lock_mock(&self.state).shown.pixels[y][x]
    }

    pub fn show_count(&self) -> usize {
        lock_mock(&self.state).show_count
    }
}

impl DisplayProvider for MockDisplayProvider {
    fn open_display(&self) -> Result<Box<dyn PixelDisplay>, TallyError> {
        let mut state = lock_mock(&self.state);
        if state.open {
            return Err(TallyError::device("rgbmatrix5x5 display is already in use"));
        }
        state.open = true;
        Ok(Box::new(MockDisplay {
            state: self.state.clone(),
        }))
    }
}

struct MockDisplay {
    state: Arc<Mutex<MockDisplayState>>,
}

impl PixelDisplay for MockDisplay {
    fn set_pixel(&mut self, x: usize, y: usize, rgb: Rgb) -> Result<(), TallyError> {
        if x >= WIDTH || y >= HEIGHT {
            return Err(TallyError::device(format!("pixel ({x}, {y}) is off the display")));
        }
        lock_mock(&self.state).buffer.pixels[y][x] = rgb;
        Ok(())
    }

    fn set_all(&mut self, rgb: Rgb) -> Result<(), TallyError> {
        lock_mock(&self.state).buffer.pixels = [[rgb; WIDTH]; HEIGHT];
        Ok(())
    }

    fn set_brightness(&mut self, brightness: f64) -> Result<(), TallyError> {
        lock_mock(&self.state).buffer.brightness = brightness.clamp(0.0, 1.0);
        Ok(())
    }

    fn show(&mut self) -> Result<(), TallyError> {
        let mut state = lock_mock(&self.state);
        state.shown = state.buffer.clone();
        state.show_count += 1;
        trace!(brightness = state.shown.brightness, "mock rgbmatrix5x5 show");
        Ok(())
    }
}

impl Drop for MockDisplay {
    fn drop(&mut self) {
        lock_mock(&self.state).open = false;
    }
}

fn default_brightness_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub config: SingleTallyConfig,
    ///Limits the maximum brightness, `0.5` scales to half.
    #[serde(default = "default_brightness_scale")]
    pub brightness_scale: f64,
}

impl DisplayOptions {
    fn validate(&self) -> Result<(), OptionError> {
        if (0.0..=1.0).contains(&self.brightness_scale) {
            Ok(())
        } else {
            Err(OptionError::OutOfRange {
                name: "brightness_scale",
                min: 0.0,
                max: 1.0,
                value: self.brightness_scale,
            })
        }
    }
}

fn log_display_error(result: Result<(), TallyError>) {
    if let Err(err) = result {
        error!("rgbmatrix5x5 display error: {err}");
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct IndicatorState {
    color: Option<TallyColor>,
    brightness: Option<f64>,
}

///Shows a solid color for a single tally.
pub struct Indicator {
    core: IoCore,
    bindings: OutputBindings,
    options: DisplayOptions,
    provider: Arc<dyn DisplayProvider>,
    display: Mutex<Option<Box<dyn PixelDisplay>>>,
    state: Mutex<IndicatorState>,
}

impl Indicator {
    pub fn new(
        options: DisplayOptions,
        provider: Arc<dyn DisplayProvider>,
    ) -> Result<Self, TallyError> {
        options.validate()?;
        Ok(Self {
            core: IoCore::new(options.config.clone()),
            bindings: OutputBindings::new(),
            options,
            provider,
            display: Mutex::new(None),
            state: Mutex::new(IndicatorState::default()),
        })
    }

    pub fn from_options(
        options: serde_json::Value,
        provider: Arc<dyn DisplayProvider>,
    ) -> Result<Self, TallyError> {
        Self::new(parse_options(INDICATOR_NAMESPACE, options)?, provider)
    }

    fn lock_display(&self) -> MutexGuard<'_, Option<Box<dyn PixelDisplay>>> {
        self.display.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, IndicatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    ///The color on the display, `None` until the first update after opening.
    pub fn color(&self) -> Option<TallyColor> {
        self.lock_state().color
    }

    ///Tally brightness before scaling.
    pub fn brightness(&self) -> Option<f64> {
        self.lock_state().brightness
    }

    fn update(&self, color: TallyColor, brightness: f64) -> Result<(), TallyError> {
        let mut display = self.lock_display();
        let Some(display) = display.as_mut() else {
            return Ok(());
        };
        let mut state = self.lock_state();
        let mut dirty = false;
        if state.color != Some(color) {
            display.set_all(color_rgb(color))?;
            state.color = Some(color);
            dirty = true;
        }
        if state.brightness != Some(brightness) {
            display.set_brightness(brightness * self.options.brightness_scale)?;
            state.brightness = Some(brightness);
            dirty = true;
        }
        if dirty {
            display.show()?;
            debug!(color = %color, brightness, "indicator updated");
        }
        Ok(())
    }
}

#[async_trait]
impl BaseIo for Indicator {
    fn namespace(&self) -> &'static str {
        INDICATOR_NAMESPACE
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        options_value(INDICATOR_NAMESPACE, &self.options)
    }

    async fn open(&self) -> Result<(), TallyError> {
        if self.is_running() {
            return Ok(());
        }
        let display = self.provider.open_display()?;
        *self.lock_display() = Some(display);
        self.core.set_running(true);
        info!(tally = %self.options.config.tally_key(), "rgbmatrix5x5 indicator open");
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        let display = self.lock_display().take();
        *self.lock_state() = IndicatorState::default();
        if let Some(mut display) = display {
            display.clear()?;
            display.show()?;
            debug!("rgbmatrix5x5 indicator closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Output for Indicator {
    fn bindings(&self) -> &OutputBindings {
        &self.bindings
    }

    async fn on_receiver_tally_change(
        &self,
        _source: &Arc<dyn Input>,
        tally: &Tally,
        _changed: &ChangedProps,
    ) -> Result<(), TallyError> {
        if !self.is_running()
            || !self.tally_matches(MatchTarget::Tally(tally), TallyType::ALL_TALLY)
        {
            return Ok(());
        }
        let color = self.get_merged_tally(tally.into(), self.options.config.tally_type());
        self.update(color, tally.normalized_brightness())
    }
}

struct UpdateTask {
    queue: mpsc::UnboundedSender<Pixel>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type PixelColors = Arc<Mutex<BTreeMap<Pixel, TallyColor>>>;

fn lock_colors(
    colors: &Mutex<BTreeMap<Pixel, TallyColor>>,
) -> MutexGuard<'_, BTreeMap<Pixel, TallyColor>> {
    colors.lock().unwrap_or_else(PoisonError::into_inner)
}

fn draw_pixel(
    display: &mut dyn PixelDisplay,
    colors: &Mutex<BTreeMap<Pixel, TallyColor>>,
    pixel: Pixel,
) {
    let color = lock_colors(colors).get(&pixel).copied().unwrap_or_default();
    let (x, y) = pixel;
    log_display_error(display.set_pixel(x, y, color_rgb(color)));
}

//draws queued pixels, showing once the queue is drained
fn spawn_update_task(
    mut display: Box<dyn PixelDisplay>,
    colors: PixelColors,
    mut queue: mpsc::UnboundedReceiver<Pixel>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let pixel = tokio::select! {
                _ = cancel.cancelled() => break,
                pixel = queue.recv() => match pixel {
                    Some(pixel) => pixel,
                    None => break,
                },
            };
            draw_pixel(display.as_mut(), &colors, pixel);
            while let Ok(pixel) = queue.try_recv() {
                draw_pixel(display.as_mut(), &colors, pixel);
            }
            log_display_error(display.show());
        }
        log_display_error(display.clear().and_then(|_| display.show()));
        debug!("rgbmatrix5x5 matrix update task shutting down");
    })
}

///Shows up to five tallies, starting at the configured tally index, one per row.
///
///The columns are the `rh_tally`, `txt_tally` and `lh_tally` lamps.
pub struct Matrix {
    core: IoCore,
    bindings: OutputBindings,
    options: DisplayOptions,
    provider: Arc<dyn DisplayProvider>,
    multi_config: MultiTallyConfig,
    cells: Vec<(SingleTallyConfig, Pixel)>,
    colors: PixelColors,
    task: Mutex<Option<UpdateTask>>,
}

impl Matrix {
    pub fn new(
        options: DisplayOptions,
        provider: Arc<dyn DisplayProvider>,
    ) -> Result<Self, TallyError> {
        options.validate()?;
        let start = options
            .config
            .tally_index()
            .ok_or(OptionError::Required { name: "tally_index" })?;
        let mut cells = Vec::new();
        for row in 0..HEIGHT {
            let Some(tally_index) = u16::try_from(row)
                .ok()
                .and_then(|row| start.checked_add(row))
                .filter(|index| *index != BROADCAST)
            else {
                continue;
            };
            for (col, lamp) in TallyType::LAMPS.into_iter().enumerate() {
                let conf = SingleTallyConfig::new(tally_index, lamp)
                    .with_screen_index(options.config.screen_index())
                    .with_color_mask(options.config.color_mask());
                cells.push((conf, (col, row)));
            }
        }
        let multi_config =
            MultiTallyConfig::new(cells.iter().map(|(conf, _)| conf.clone()).collect());
        let colors = (0..HEIGHT)
            .flat_map(|y| (0..WIDTH).map(move |x| ((x, y), TallyColor::Off)))
            .collect();
        Ok(Self {
            core: IoCore::new(options.config.clone()),
            bindings: OutputBindings::new(),
            options,
            provider,
            multi_config,
            cells,
            colors: Arc::new(Mutex::new(colors)),
            task: Mutex::new(None),
        })
    }

    pub fn from_options(
        options: serde_json::Value,
        provider: Arc<dyn DisplayProvider>,
    ) -> Result<Self, TallyError> {
        Self::new(parse_options(MATRIX_NAMESPACE, options)?, provider)
    }

    ///The filter built from the five rows.
    pub fn multi_config(&self) -> &MultiTallyConfig {
        &self.multi_config
    }

    pub fn pixel_color(&self, pixel: Pixel) -> Option<TallyColor> {
        lock_colors(&self.colors).get(&pixel).copied()
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<UpdateTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_update(&self, pixels: impl IntoIterator<Item = Pixel>) {
        let task = self.lock_task();
        let Some(task) = task.as_ref() else {
            return;
        };
        for pixel in pixels {
            if task.queue.send(pixel).is_err() {
                debug!("rgbmatrix5x5 matrix update task is gone");
                return;
            }
        }
    }
}

#[async_trait]
impl BaseIo for Matrix {
    fn namespace(&self) -> &'static str {
        MATRIX_NAMESPACE
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        options_value(MATRIX_NAMESPACE, &self.options)
    }

    fn find_tally_match(
        &self,
        target: MatchTarget<'_>,
        tally_type: TallyType,
    ) -> Option<SingleTallyConfig> {
        self.multi_config.find_match(target, tally_type)
    }

    async fn open(&self) -> Result<(), TallyError> {
        if self.is_running() {
            return Ok(());
        }
        let mut display = self.provider.open_display()?;
        display.set_brightness(self.options.brightness_scale)?;
        let (queue, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_update_task(display, self.colors.clone(), receiver, cancel.clone());
        *self.lock_task() = Some(UpdateTask {
            queue,
            cancel,
            handle,
        });
        let pixels: Vec<Pixel> = lock_colors(&self.colors).keys().copied().collect();
        self.queue_update(pixels);
        self.core.set_running(true);
        info!(tally = %self.options.config.tally_key(), "rgbmatrix5x5 matrix open");
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.cancel.cancel();
            drop(task.queue);
            if let Err(err) = task.handle.await {
                error!("rgbmatrix5x5 matrix update task failed: {err}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Output for Matrix {
    fn bindings(&self) -> &OutputBindings {
        &self.bindings
    }

    async fn on_receiver_tally_change(
        &self,
        _source: &Arc<dyn Input>,
        tally: &Tally,
        changed: &ChangedProps,
    ) -> Result<(), TallyError> {
        if !self.is_running() {
            return Ok(());
        }
        let mut dirty = Vec::new();
        for lamp in changed.lamp_types().lamps() {
            let pixels: Vec<Pixel> = self
                .cells
                .iter()
                .filter(|(conf, _)| conf.matches(MatchTarget::Tally(tally), lamp))
                .map(|(_, pixel)| *pixel)
                .collect();
            if pixels.is_empty() {
                continue;
            }
            let color = self.get_merged_tally(tally.into(), lamp);
            let mut colors = lock_colors(&self.colors);
            for pixel in pixels {
                if colors.insert(pixel, color) != Some(color) {
                    dirty.push(pixel);
                }
            }
        }
        self.queue_update(dirty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tally_core::{
        binding::bind_to_input,
        test_utils::{settle, TableInput},
        TallyKey,
    };

    const AMBER: Rgb = (0xff, 0xbf, 0);

    fn options(tally_index: u16, brightness_scale: f64) -> DisplayOptions {
        DisplayOptions {
            config: SingleTallyConfig::new(tally_index, TallyType::RH_TALLY).with_screen_index(0),
            brightness_scale,
        }
    }

    #[tokio::test]
    async fn indicator_shows_merged_color() {
        let provider = MockDisplayProvider::new();
        let key = TallyKey::new(0, 1);
        let red = Arc::new(TableInput::new(
            SingleTallyConfig::for_key(key, TallyType::RH_TALLY).with_color_mask(TallyColor::Red),
        ));
        let green = Arc::new(TableInput::new(
            SingleTallyConfig::for_key(key, TallyType::RH_TALLY).with_color_mask(TallyColor::Green),
        ));
        red.core().assign_id("test.TableInput:000").unwrap();
        green.core().assign_id("test.TableInput:001").unwrap();

        let indicator =
            Arc::new(Indicator::new(options(1, 0.5), Arc::new(provider.clone())).unwrap());
        indicator.core().assign_id("rgbmatrix5x5.Indicator:000").unwrap();
        indicator.open().await.unwrap();
        let out: Arc<dyn Output> = indicator.clone();
        for input in [red.clone(), green.clone()] {
            let input: Arc<dyn Input> = input;
            bind_to_input(&out, &input).await.unwrap();
        }
        assert_eq!(indicator.color(), Some(TallyColor::Off));
        assert_eq!(provider.shown().brightness, 0.5);

        red.set_state(true);
        settle().await;
        assert_eq!(indicator.color(), Some(TallyColor::Red));
        assert_eq!(provider.pixel(4, 4), (255, 0, 0));

        green.set_state(true);
        settle().await;
        assert_eq!(indicator.color(), Some(TallyColor::Amber));
        assert_eq!(provider.shown().pixels, [[AMBER; WIDTH]; HEIGHT]);

        indicator.close().await.unwrap();
        assert!(!provider.is_open());
        assert_eq!(provider.pixel(0, 0), (0, 0, 0));
        indicator.close().await.unwrap();
    }

    #[tokio::test]
    async fn displays_are_exclusive() {
        let provider = MockDisplayProvider::new();
        let first = Indicator::new(options(1, 1.0), Arc::new(provider.clone())).unwrap();
        let second = Matrix::new(options(1, 1.0), Arc::new(provider.clone())).unwrap();
        first.open().await.unwrap();
        assert!(matches!(second.open().await, Err(TallyError::Device(_))));
        assert!(!second.is_running());
        first.close().await.unwrap();
        second.open().await.unwrap();
        assert!(provider.is_open());
        second.close().await.unwrap();
        assert!(!provider.is_open());
    }

    #[tokio::test]
    async fn matrix_rows_follow_tallies() {
        let provider = MockDisplayProvider::new();
        let input = Arc::new(TableInput::new(MultiTallyConfig::allow_all(None)));
        input.core().assign_id("test.TableInput:000").unwrap();
        for index in [4, 6, 9] {
            input.add_tally(TallyKey::new(0, index));
        }
        input.set_color(TallyKey::new(0, 4), TallyType::RH_TALLY, TallyColor::Red);

        let matrix = Arc::new(Matrix::new(options(4, 1.0), Arc::new(provider.clone())).unwrap());
        matrix.core().assign_id("rgbmatrix5x5.Matrix:000").unwrap();
        matrix.open().await.unwrap();
        let out: Arc<dyn Output> = matrix.clone();
        let src: Arc<dyn Input> = input.clone();
        bind_to_input(&out, &src).await.unwrap();
        assert_eq!(
            matrix.bindings().bound_tally_keys().keys().copied().collect::<Vec<_>>(),
            vec![TallyKey::new(0, 4), TallyKey::new(0, 6)]
        );

        input.set_color(TallyKey::new(0, 6), TallyType::LH_TALLY, TallyColor::Green);
        input.set_color(TallyKey::new(0, 9), TallyType::TXT_TALLY, TallyColor::Red);
        settle().await;
        assert_eq!(matrix.pixel_color((0, 0)), Some(TallyColor::Red));
        assert_eq!(matrix.pixel_color((2, 2)), Some(TallyColor::Green));
        assert_eq!(matrix.pixel_color((1, 0)), Some(TallyColor::Off));
        assert_eq!(provider.pixel(0, 0), (255, 0, 0));
        assert_eq!(provider.pixel(2, 2), (0, 255, 0));
        assert_eq!(provider.pixel(3, 4), (0, 0, 0));

        matrix.close().await.unwrap();
        assert!(!provider.is_open());
        assert_eq!(provider.shown().pixels, [[(0, 0, 0); WIDTH]; HEIGHT]);
    }

    #[test]
    fn matrix_filter_covers_five_rows() {
        let matrix = Matrix::new(options(4, 1.0), Arc::new(MockDisplayProvider::new())).unwrap();
        assert_eq!(matrix.multi_config().tallies().len(), 15);
        assert!(matrix.tally_matches(MatchTarget::Key(TallyKey::new(0, 8)), TallyType::TXT_TALLY));
        assert!(!matrix.tally_matches(MatchTarget::Key(TallyKey::new(0, 9)), TallyType::TXT_TALLY));
        assert!(!matrix.tally_matches(MatchTarget::Key(TallyKey::new(1, 5)), TallyType::RH_TALLY));

        //rows past the last tally index are dropped
        let edge =
            Matrix::new(options(BROADCAST - 2, 1.0), Arc::new(MockDisplayProvider::new())).unwrap();
        assert_eq!(edge.multi_config().tallies().len(), 6);
    }

    #[test]
    fn option_validation() {
        let provider: Arc<dyn DisplayProvider> = Arc::new(MockDisplayProvider::new());
        let broadcast = serde_json::json!({"config": {"tally_index": BROADCAST}});
        assert!(matches!(
            Matrix::from_options(broadcast, provider.clone()),
            Err(TallyError::Option(OptionError::Required { name: "tally_index" }))
        ));
        assert!(matches!(
            Indicator::new(options(1, 2.0), provider.clone()),
            Err(TallyError::Option(OptionError::OutOfRange { .. }))
        ));
        let indicator = Indicator::new(options(3, 0.25), provider.clone()).unwrap();
        let record = indicator.serialize().unwrap();
        let rebuilt = Indicator::from_options(record.options.clone(), provider).unwrap();
        assert_eq!(rebuilt.serialize().unwrap(), record);
    }

    #[tokio::test]
    async fn missing_driver_fails_open() {
        let indicator = Indicator::new(options(1, 1.0), Arc::new(NoDisplay)).unwrap();
        assert!(matches!(indicator.open().await, Err(TallyError::Device(_))));
        indicator.close().await.unwrap();
    }
}

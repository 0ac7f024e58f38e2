//! Executes parsed light actions against the cloud client

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cloud::{CloudApiClient, DispatchError};

use super::action::{parse_action, LightAction, FULL_SCALE};
use super::vocabulary::Vocabulary;

/// Light operations the dispatcher needs
#[async_trait]
pub trait LightControl: Send {
    async fn set_power(&mut self, on: bool) -> Result<(), DispatchError>;
    async fn set_brightness(&mut self, level: u16) -> Result<(), DispatchError>;
    async fn set_color(&mut self, hue: u16, saturation: u16, value: u16)
        -> Result<(), DispatchError>;
    async fn set_white(&mut self, brightness: u16) -> Result<(), DispatchError>;
}

#[async_trait]
impl LightControl for CloudApiClient {
    async fn set_power(&mut self, on: bool) -> Result<(), DispatchError> {
        CloudApiClient::set_power(self, on).await
    }

    async fn set_brightness(&mut self, level: u16) -> Result<(), DispatchError> {
        CloudApiClient::set_brightness(self, level).await
    }

    async fn set_color(
        &mut self,
        hue: u16,
        saturation: u16,
        value: u16,
    ) -> Result<(), DispatchError> {
        CloudApiClient::set_color(self, hue, saturation, value).await
    }

    async fn set_white(&mut self, brightness: u16) -> Result<(), DispatchError> {
        CloudApiClient::set_white(self, brightness).await
    }
}

/// Result of dispatching one fulfillment text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Text matched no action
    NoAction,
    Applied(LightAction),
    /// The action was attempted and failed; `notice` is meant to be spoken
    Failed { action: LightAction, notice: String },
}

/// Routes fulfillment text to light commands
#[derive(Debug, Clone, Copy)]
pub struct ActionDispatcher {
    vocabulary: &'static Vocabulary,
}

impl ActionDispatcher {
    pub fn new(vocabulary: &'static Vocabulary) -> Self {
        Self { vocabulary }
    }

    /// Parse `fulfillment_text` and apply the matching action, if any.
    ///
    /// Client failures are turned into [`DispatchOutcome::Failed`].
    pub async fn dispatch<L>(&self, light: &mut L, fulfillment_text: &str) -> DispatchOutcome
    where
        L: LightControl + ?Sized,
    {
        let Some(action) = parse_action(fulfillment_text, self.vocabulary) else {
            debug!("fulfillment text matched no light action");
            return DispatchOutcome::NoAction;
        };

        let result = match action {
            LightAction::Power(on) => light.set_power(on).await,
            LightAction::Brightness { level } => light.set_brightness(level).await,
            LightAction::White { level } => light.set_white(level).await,
            LightAction::Color { hue } => light.set_color(hue, FULL_SCALE, FULL_SCALE).await,
        };

        match result {
            Ok(()) => {
                info!(?action, "light action applied");
                DispatchOutcome::Applied(action)
            }
            Err(err) => {
                warn!(?action, ?err, "light action failed");
                DispatchOutcome::Failed {
                    action,
                    notice: self.vocabulary.actuation_failed.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::vocabulary::ENGLISH;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Power(bool),
        Brightness(u16),
        Color(u16, u16, u16),
        White(u16),
    }

    #[derive(Default)]
    struct RecordingLight {
        calls: Vec<Call>,
        fail: bool,
    }

    impl RecordingLight {
        fn record(&mut self, call: Call) -> Result<(), DispatchError> {
            self.calls.push(call);
            if self.fail {
                Err(DispatchError::NotAuthenticated)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl LightControl for RecordingLight {
        async fn set_power(&mut self, on: bool) -> Result<(), DispatchError> {
            self.record(Call::Power(on))
        }
        async fn set_brightness(&mut self, level: u16) -> Result<(), DispatchError> {
            self.record(Call::Brightness(level))
        }
        async fn set_color(&mut self, h: u16, s: u16, v: u16) -> Result<(), DispatchError> {
            self.record(Call::Color(h, s, v))
        }
        async fn set_white(&mut self, brightness: u16) -> Result<(), DispatchError> {
            self.record(Call::White(brightness))
        }
    }

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(&ENGLISH)
    }

    #[tokio::test]
    async fn test_power_on_only() {
        let mut light = RecordingLight::default();
        let outcome = dispatcher()
            .dispatch(&mut light, "Light activated. Color red is nice")
            .await;
        assert_eq!(outcome, DispatchOutcome::Applied(LightAction::Power(true)));
        assert_eq!(light.calls, vec![Call::Power(true)]);
    }

    #[tokio::test]
    async fn test_named_color_uses_full_scale() {
        let mut light = RecordingLight::default();
        dispatcher()
            .dispatch(&mut light, "set color to blue please")
            .await;
        assert_eq!(light.calls, vec![Call::Color(240, 1000, 1000)]);
    }

    #[tokio::test]
    async fn test_brightness_level() {
        let mut light = RecordingLight::default();
        dispatcher().dispatch(&mut light, "set brightness to 150").await;
        assert_eq!(light.calls, vec![Call::Brightness(1000)]);
    }

    #[tokio::test]
    async fn test_white_level() {
        let mut light = RecordingLight::default();
        dispatcher().dispatch(&mut light, "color white 60").await;
        assert_eq!(light.calls, vec![Call::White(600)]);
    }

    #[tokio::test]
    async fn test_unmatched_text_makes_no_call() {
        let mut light = RecordingLight::default();
        let outcome = dispatcher().dispatch(&mut light, "color to mauve").await;
        assert_eq!(outcome, DispatchOutcome::NoAction);
        assert!(light.calls.is_empty());
    }

    #[tokio::test]
    async fn test_client_failure_becomes_notice() {
        let mut light = RecordingLight {
            fail: true,
            ..Default::default()
        };
        let outcome = dispatcher().dispatch(&mut light, "light deactivated").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                action: LightAction::Power(false),
                notice: ENGLISH.actuation_failed.to_string(),
            }
        );
    }
}

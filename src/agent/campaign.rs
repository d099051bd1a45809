//! Referral campaign agent
//!
//! Owns the invite-friend, claim-coupon and manage-campaign states and runs
//! one six-step machine across them:
//!
//! | sub-state | step          | accepts                         |
//! |-----------|---------------|---------------------------------|
//! | 0         | branch        | anything (routes on entry state)|
//! | 1         | verify admin  | the admin passphrase            |
//! | 2         | update count  | integer or skip keyword         |
//! | 3         | open campaign | positive integer or decline     |
//! | 4         | set image     | an image                        |
//! | 5         | verify code   | six-digit sharing code          |

mod code;
mod state;

#[cfg(test)]
mod proptests;

pub use code::SharingCode;
pub use state::{CampaignSnapshot, CampaignState, ClaimMode};

use super::{Agent, AgentError, Outcome, TurnContext};
use crate::classifier::matches_any;
use crate::db::{UserProfile, FOLLOW_TIME_FORMAT};
use crate::message::{MessageKind, OutboundMessage};
use crate::runtime::{
    CampaignKeeper, ImageService, ProfileStore, StoreResult, SubState, TopLevelState, ENTRY_STATE,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ADMIN_PASSPHRASE: &str = "I am Sung Kim!!";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const NO_IMAGE_REPLY: &str = "NO IMAGE FOR COUPON YET";
pub const IMAGE_FETCH_FAILED_REPLY: &str = "ERROR in getting the image, session cancelled";

const COUPON_IMAGE_FORMAT: &str = "png";
const SKIP_KEYWORDS: &[&str] = &["no", "nope", "skip", "next"];
const DECLINE_KEYWORDS: &[&str] = &["no", "nope", "n't"];

// Scratch key recording which admin step led to the image prompt
const IMAGE_ORIGIN_KEY: &str = "image_origin";

const STATES: [TopLevelState; 3] = [
    TopLevelState::InviteFriend,
    TopLevelState::ClaimCoupon,
    TopLevelState::ManageCampaign,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Branch,
    VerifyAdmin,
    UpdateCount,
    OpenCampaign,
    SetImage,
    VerifyCode,
}

impl Step {
    const ALL: [Step; 6] = [
        Step::Branch,
        Step::VerifyAdmin,
        Step::UpdateCount,
        Step::OpenCampaign,
        Step::SetImage,
        Step::VerifyCode,
    ];

    fn id(self) -> SubState {
        match self {
            Step::Branch => ENTRY_STATE,
            Step::VerifyAdmin => 1,
            Step::UpdateCount => 2,
            Step::OpenCampaign => 3,
            Step::SetImage => 4,
            Step::VerifyCode => 5,
        }
    }

    fn from_id(id: SubState) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.id() == id)
    }

    fn next(self) -> Outcome {
        Outcome::Next(self.id())
    }
}

const SUB_STATES: [SubState; 6] = [0, 1, 2, 3, 4, 5];

/// Tunables for the campaign agent
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub admin_passphrase: String,
    pub claim_mode: ClaimMode,
    /// Upper bound on downloading an admin's coupon image
    pub fetch_timeout: Duration,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            admin_passphrase: DEFAULT_ADMIN_PASSPHRASE.to_string(),
            claim_mode: ClaimMode::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Campaign summary for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatus {
    #[serde(flatten)]
    pub campaign: CampaignSnapshot,
    pub open: bool,
    pub claimed: i64,
    pub has_image: bool,
    pub claim_mode: ClaimMode,
}

pub struct CampaignManager {
    keeper: Arc<dyn CampaignKeeper>,
    profiles: Arc<dyn ProfileStore>,
    images: Arc<dyn ImageService>,
    campaign: CampaignState,
    config: CampaignConfig,
}

impl CampaignManager {
    /// Build the agent with a closed campaign. The mint serial resumes after
    /// the highest sharing code already stored.
    pub async fn new(
        keeper: Arc<dyn CampaignKeeper>,
        profiles: Arc<dyn ProfileStore>,
        images: Arc<dyn ImageService>,
        config: CampaignConfig,
    ) -> StoreResult<Self> {
        let next_serial = keeper
            .highest_sharing_serial()
            .await?
            .map_or(0, |serial| serial.saturating_add(1));
        tracing::info!(next_serial, claim_mode = %config.claim_mode, "Campaign agent ready");

        Ok(Self {
            keeper,
            profiles,
            images,
            campaign: CampaignState::new(next_serial),
            config,
        })
    }

    #[allow(dead_code)] // Used in tests
    pub fn campaign(&self) -> CampaignSnapshot {
        self.campaign.snapshot()
    }

    pub async fn status(&self) -> StoreResult<CampaignStatus> {
        let campaign = self.campaign.snapshot();
        Ok(CampaignStatus {
            open: campaign.is_open(),
            campaign,
            claimed: self.keeper.claim_count().await?,
            has_image: self.keeper.coupon_image().await?.is_some(),
            claim_mode: self.config.claim_mode,
        })
    }

    async fn branch(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        match ctx.state {
            TopLevelState::InviteFriend => self.invite_friend(ctx).await,
            TopLevelState::ClaimCoupon => {
                ctx.reply(&["Great! What is your sharing code for the coupon? Please input the 6 digit code only."])
                    .await;
                Ok(Step::VerifyCode.next())
            }
            TopLevelState::ManageCampaign => self.manage_campaign(ctx).await,
            state => Err(AgentError::ForeignState {
                agent: self.name(),
                state,
            }),
        }
    }

    async fn invite_friend(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let campaign = self.campaign.snapshot();
        if !campaign.is_open() {
            ctx.reply(&["Sorry, the campaign is not ongoing at this stage. Please keep an eye on this so that you won't miss it! ^_^"])
                .await;
            return Ok(Outcome::End);
        }

        let sold_out = "I am sorry that we do not have available coupons now. Please come earlier next time! ^_^";
        if self.keeper.claim_count().await? >= campaign.available {
            ctx.reply(&[sold_out]).await;
            return Ok(Outcome::End);
        }

        let Some(code) = SharingCode::from_serial(self.campaign.mint_serial()) else {
            tracing::warn!(user_id = %ctx.user_id(), "Sharing code space exhausted");
            ctx.reply(&[sold_out]).await;
            return Ok(Outcome::End);
        };

        self.keeper
            .set_sharing_owner(code.as_str(), ctx.user_id())
            .await?;
        tracing::info!(user_id = %ctx.user_id(), code = %code, "Issued sharing code");

        let code_line = format!("This is your sharing code: {code}");
        ctx.reply(&["Thank you for promoting our service! ^_^", code_line.as_str()])
            .await;
        Ok(Outcome::End)
    }

    async fn manage_campaign(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let Some(profile) = self.profiles.profile(ctx.user_id()).await? else {
            ctx.reply(&["Sorry, we cannot verify your admin identity. Please do 'setting' first. Session cancelled."])
                .await;
            return Ok(Outcome::End);
        };

        if !profile.is_admin {
            ctx.reply(&["You are not an admin user now. If you want to enable your admin privilege, please input your admin access code."])
                .await;
            return Ok(Step::VerifyAdmin.next());
        }

        let campaign = self.campaign.snapshot();
        if campaign.is_open() {
            let count_line = format!(
                "The campaign is now open, and the number of available coupon is {}.",
                campaign.available
            );
            ctx.reply(&[
                "Hi admin user! ^_^",
                count_line.as_str(),
                "Do you want to update it? Tell me a number or say 'skip'.",
            ])
            .await;
            Ok(Step::UpdateCount.next())
        } else {
            ctx.reply(&[
                "Hi admin user! ^_^",
                "The campaign is not open now. Do you want to start it now?",
                "Input a positive number as the number of available coupons for this campaign, or say 'no'.",
            ])
            .await;
            Ok(Step::OpenCampaign.next())
        }
    }

    async fn verify_admin(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let submitted = ctx.message.text_content();
        if submitted != Some(self.config.admin_passphrase.as_str()) {
            tracing::warn!(user_id = %ctx.user_id(), "Admin access code rejected");
            ctx.reply(&["Incorrect access code. Access denied."]).await;
            return Ok(Outcome::End);
        }

        let Some(mut profile) = self.profiles.profile(ctx.user_id()).await? else {
            ctx.reply(&["Sorry, we cannot verify your admin identity. Please do 'setting' first. Session cancelled."])
                .await;
            return Ok(Outcome::End);
        };
        profile.is_admin = true;
        self.profiles.store_profile(ctx.user_id(), &profile).await?;
        tracing::info!(user_id = %ctx.user_id(), "Admin mode enabled");

        ctx.reply(&["Admin mode has been enabled for you."]).await;
        self.manage_campaign(ctx).await
    }

    async fn update_count(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let text = ctx
            .message
            .text_content()
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_default();

        let mut reply = ctx.reply_to_sender();
        if let Ok(available) = text.parse::<i64>() {
            if available <= 0 {
                self.campaign.close();
                tracing::info!(user_id = %ctx.user_id(), "Campaign closed by admin");
                ctx.reply(&["Set available coupon to non-positive, campaign stopped."])
                    .await;
                return Ok(Outcome::End);
            }
            self.campaign.set_available(available);
            tracing::info!(user_id = %ctx.user_id(), available, "Coupon supply updated");
            reply = reply.text(format!("Set available coupon to {available}."));
        } else if matches_any(&text, SKIP_KEYWORDS) {
            reply = reply.text("Update coupon number skipped.");
        } else {
            ctx.reply(&["Please tell me the updated available coupon number, or ask me to skip this part explicitly."])
                .await;
            return Ok(Step::UpdateCount.next());
        }

        ctx.scratch
            .insert(IMAGE_ORIGIN_KEY.to_string(), Value::from("update"));
        ctx.send(reply.text(
            "Now do you want to update the image of the coupon? If yes, send an image to me. Otherwise, please say 'CANCEL'.",
        ))
        .await;
        Ok(Step::SetImage.next())
    }

    async fn open_campaign(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let text = ctx.message.text_content().map(str::trim).unwrap_or_default();

        match text.parse::<i64>() {
            Ok(available) if available > 0 => {
                // Reset first so a failed write leaves the campaign closed
                self.keeper.reset_claim_count().await?;
                self.campaign.open(available, Utc::now());
                tracing::info!(user_id = %ctx.user_id(), available, "Campaign opened");

                ctx.scratch
                    .insert(IMAGE_ORIGIN_KEY.to_string(), Value::from("open"));
                let start_line = format!("Start campaign with a total of {available} coupon(s).");
                ctx.reply(&[
                    start_line.as_str(),
                    "Now please set the image of the coupon. You can say 'CANCEL' to skip.",
                ])
                .await;
                Ok(Step::SetImage.next())
            }
            Ok(_) => {
                ctx.reply(&["Either input a positive number, or say you do not want to start a campaign explicitly."])
                    .await;
                Ok(Step::OpenCampaign.next())
            }
            Err(_) if matches_any(text, DECLINE_KEYWORDS) => {
                ctx.reply(&["OK, cancelling to start a campaign."]).await;
                Ok(Outcome::End)
            }
            Err(_) => {
                ctx.reply(&["I don't understand what you have said."]).await;
                Ok(Step::OpenCampaign.next())
            }
        }
    }

    async fn set_image(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let MessageKind::Image(reference) = &ctx.message.kind else {
            ctx.reply(&["Please send me a photo or say 'CANCEL'."]).await;
            return Ok(Step::SetImage.next());
        };

        let fetched =
            tokio::time::timeout(self.config.fetch_timeout, self.images.fetch_bytes(reference))
                .await;
        let bytes = match fetched {
            Ok(Ok(bytes)) if !bytes.is_empty() => bytes,
            Ok(Ok(_)) => {
                tracing::warn!(user_id = %ctx.user_id(), reference = %reference, "Coupon image is empty");
                ctx.reply(&[IMAGE_FETCH_FAILED_REPLY]).await;
                return Ok(Outcome::End);
            }
            Ok(Err(e)) => {
                tracing::warn!(user_id = %ctx.user_id(), error = %e, "Coupon image fetch failed");
                ctx.reply(&[IMAGE_FETCH_FAILED_REPLY]).await;
                return Ok(Outcome::End);
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %ctx.user_id(),
                    timeout = ?self.config.fetch_timeout,
                    "Coupon image fetch timed out"
                );
                ctx.reply(&[IMAGE_FETCH_FAILED_REPLY]).await;
                return Ok(Outcome::End);
            }
        };

        self.keeper
            .set_coupon_image(&URL_SAFE_NO_PAD.encode(&bytes))
            .await?;
        tracing::info!(
            user_id = %ctx.user_id(),
            bytes = bytes.len(),
            origin = ?ctx.scratch.get(IMAGE_ORIGIN_KEY),
            "Coupon image updated"
        );

        ctx.reply(&[
            "Set image of the coupon succeeded.",
            "Leaving admin mode for campaign management.",
        ])
        .await;
        Ok(Outcome::End)
    }

    async fn verify_code(&self, ctx: &mut TurnContext<'_>) -> Result<Outcome, AgentError> {
        let user_id = ctx.user_id().to_string();

        let Some(code) = ctx.message.text_content().and_then(SharingCode::parse) else {
            ctx.reply(&[
                "Sorry, the format for the coupon claimed is invalid",
                "The correct format should be 'code <6-digit number>'.",
            ])
            .await;
            return Ok(Outcome::End);
        };

        let campaign = self.campaign.snapshot();
        if !campaign.is_open() {
            ctx.reply(&["Sorry, the campaign is not ongoing at this stage. Please stay tuned on this :)"])
                .await;
            return Ok(Outcome::End);
        }

        let exhausted = "Sorry, but all the available coupons are now distributed. Please be earlier next time ~";
        if self.keeper.claim_count().await? >= campaign.available {
            ctx.reply(&[exhausted]).await;
            return Ok(Outcome::End);
        }

        let Some(owner) = self.keeper.sharing_owner(code.as_str()).await? else {
            ctx.reply(&[
                "Well, this is not a valid sharing Id.",
                "Please double check. Session cancelled.",
            ])
            .await;
            return Ok(Outcome::End);
        };

        let Some(mut profile) = self.profiles.profile(&user_id).await? else {
            ctx.reply(&[
                "Well, I don't have your personal information yet, so you cannot claim the coupon now.",
                "Please do so by 'setting'. Session cancelled.",
            ])
            .await;
            return Ok(Outcome::End);
        };

        if profile.has_claimed() {
            ctx.reply(&[
                "Well, one user can only claim the coupon using 'code' once.",
                "But you can share this chatbot with your friends to get more coupons!",
            ])
            .await;
            return Ok(Outcome::End);
        }

        if owner == user_id {
            ctx.reply(&["Well, seems that this code is issued as your sharing code, so you cannot self-claim it :("])
                .await;
            return Ok(Outcome::End);
        }

        if !followed_since(&profile, campaign.started_at) {
            ctx.reply(&["Sorry, you are not a user following us after the campaign start."])
                .await;
            return Ok(Outcome::End);
        }

        profile.parent_user_id = Some(owner.clone());
        match self.config.claim_mode {
            ClaimMode::Atomic => {
                // Re-read the supply so a concurrent admin change is honored
                let limit = self.campaign.snapshot().available;
                if !self.keeper.claim_unit(limit).await? {
                    ctx.reply(&[exhausted]).await;
                    return Ok(Outcome::End);
                }
                self.profiles.store_profile(&user_id, &profile).await?;
            }
            ClaimMode::Racy => {
                self.profiles.store_profile(&user_id, &profile).await?;
                self.keeper.increment_claim_count().await?;
            }
        }
        tracing::info!(user_id = %user_id, referrer = %owner, code = %code, "Coupon claimed");

        self.deliver_coupon(ctx, &owner).await?;
        Ok(Outcome::End)
    }

    /// Send the current coupon to the claimant and to the referrer. The
    /// image is published once and both messages carry the same URL.
    async fn deliver_coupon(&self, ctx: &TurnContext<'_>, referrer: &str) -> Result<(), AgentError> {
        let url = match self.keeper.coupon_image().await? {
            Some(encoded) => Some(
                self.images
                    .publish_for_viewing(ctx.user_id(), &encoded, COUPON_IMAGE_FORMAT)
                    .await?,
            ),
            None => None,
        };
        let claimant = coupon_message(
            ctx.user_id(),
            url.as_deref(),
            &["Congratulations! This is the coupon you claimed:"],
        );
        let reward = coupon_message(
            referrer,
            url.as_deref(),
            &[
                "Hey, one more user follows our chatbot by your promotion ~",
                "This coupon is rewarded to you:",
            ],
        );
        ctx.send(claimant).await;
        ctx.send(reward).await;
        Ok(())
    }
}

/// Text lines followed by the coupon image, or a placeholder without one
fn coupon_message(user_id: &str, url: Option<&str>, lines: &[&str]) -> OutboundMessage {
    let message = lines
        .iter()
        .fold(OutboundMessage::new(user_id), |msg, line| msg.text(*line));
    match url {
        Some(url) => message.image(url, url),
        None => message.text(NO_IMAGE_REPLY),
    }
}

/// Whether the user followed at or after the campaign start, compared at
/// whole-second precision. Unparseable or missing follow times are not
/// eligible.
fn followed_since(profile: &UserProfile, started_at: Option<DateTime<Utc>>) -> bool {
    let (Some(start), Some(raw)) = (started_at, profile.follow_time.as_deref()) else {
        return false;
    };
    match NaiveDateTime::parse_from_str(raw, FOLLOW_TIME_FORMAT) {
        Ok(followed) => followed.and_utc().timestamp() >= start.timestamp(),
        Err(e) => {
            tracing::warn!(follow_time = %raw, error = %e, "Unparseable follow time");
            false
        }
    }
}

#[async_trait]
impl Agent for CampaignManager {
    fn name(&self) -> &'static str {
        "CampaignManager"
    }

    fn states(&self) -> &[TopLevelState] {
        &STATES
    }

    fn sub_states(&self) -> &[SubState] {
        &SUB_STATES
    }

    async fn handle(
        &self,
        sub_state: SubState,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Outcome, AgentError> {
        let Some(step) = Step::from_id(sub_state) else {
            return Err(AgentError::UnknownSubState {
                agent: self.name(),
                sub_state,
            });
        };

        match step {
            Step::Branch => self.branch(ctx).await,
            Step::VerifyAdmin => self.verify_admin(ctx).await,
            Step::UpdateCount => self.update_count(ctx).await,
            Step::OpenCampaign => self.open_campaign(ctx).await,
            Step::SetImage => self.set_image(ctx).await,
            Step::VerifyCode => self.verify_code(ctx).await,
        }
    }
}

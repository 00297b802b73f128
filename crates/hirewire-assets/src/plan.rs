use hirewire_types::{ChannelId, FormatId};

/// Static fan-out from a selected channel to its asset rows. The first
/// format per channel is the master; the rest adapt from it.
pub fn formats_for_channel(channel: ChannelId) -> &'static [FormatId] {
    match channel {
        ChannelId::Linkedin => &[FormatId::LinkedinJobPosting, FormatId::LinkedinFeedPost],
        ChannelId::X => &[FormatId::XPost, FormatId::XThreadOpener],
        ChannelId::Facebook => &[FormatId::FacebookFeedPost, FormatId::FacebookJobListing],
        ChannelId::Instagram => &[FormatId::InstagramCaption, FormatId::SocialImageCaption],
        ChannelId::Tiktok => &[FormatId::ShortVideoTiktok, FormatId::SocialImageCaption],
        ChannelId::GoogleJobs => &[FormatId::GoogleJobsListing],
        ChannelId::Indeed => &[FormatId::IndeedListing],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAsset {
    pub asset_id: String,
    pub format_id: FormatId,
    pub channel_id: ChannelId,
}

pub fn asset_id_for(channel: ChannelId, format: FormatId) -> String {
    format!(
        "{}:{}",
        channel.as_str().to_ascii_lowercase(),
        format.as_str().to_ascii_lowercase()
    )
}

/// Deterministic expansion of the selected channels into concrete rows.
/// Duplicate channel selections collapse; row order follows selection order.
pub fn expand_plan(channels: &[ChannelId]) -> Vec<PlannedAsset> {
    let mut seen = std::collections::HashSet::new();
    let mut plan = Vec::new();
    for channel in channels {
        if !seen.insert(*channel) {
            continue;
        }
        for format in formats_for_channel(*channel) {
            plan.push(PlannedAsset {
                asset_id: asset_id_for(*channel, *format),
                format_id: *format,
                channel_id: *channel,
            });
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkedin_plus_x_plans_four_assets() {
        let plan = expand_plan(&[ChannelId::Linkedin, ChannelId::X]);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].format_id, FormatId::LinkedinJobPosting);
        assert_eq!(plan[2].format_id, FormatId::XPost);
    }

    #[test]
    fn plan_size_equals_sum_of_static_fanout() {
        let channels = [ChannelId::Tiktok, ChannelId::GoogleJobs, ChannelId::Instagram];
        let expected: usize = channels
            .iter()
            .map(|c| formats_for_channel(*c).len())
            .sum();
        assert_eq!(expand_plan(&channels).len(), expected);
    }

    #[test]
    fn duplicate_channels_collapse() {
        let plan = expand_plan(&[ChannelId::Linkedin, ChannelId::Linkedin]);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn shared_formats_get_channel_scoped_ids() {
        let tiktok = expand_plan(&[ChannelId::Tiktok]);
        let instagram = expand_plan(&[ChannelId::Instagram]);
        let tiktok_caption = tiktok
            .iter()
            .find(|a| a.format_id == FormatId::SocialImageCaption)
            .expect("row");
        let instagram_caption = instagram
            .iter()
            .find(|a| a.format_id == FormatId::SocialImageCaption)
            .expect("row");
        assert_ne!(tiktok_caption.asset_id, instagram_caption.asset_id);
    }
}

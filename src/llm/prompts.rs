use crate::analysis::Category;
use crate::curation::AlbumKey;

pub const PHOTO_JUDGE_SYSTEM: &str = "You are an expert professional event photographer \
(weddings, quinceañeras, graduations, portraits).

Your job is to review photos and give precise assessments that help the photographer \
pick the best ones to deliver to the client.

Rules:
- overallScore is 1.0 to 10.0 with exactly one decimal (7.4, never 7). 7.0+ means worth delivering.
- Be strict but fair. Flag technical problems: unintended blur, closed eyes, stiff poses, distracting backgrounds.
- Tell intentional bokeh (good) apart from accidental blur (bad).
- Genuine emotion is worth more than a perfect pose.
- emotion.valence runs from -1 (negative) to 1 (positive).
- discardReason is null for photos worth keeping.
- Categorize each photo by the moment of the event it shows.";

/// Batch instructions, followed in the request by one labelled image per photo.
pub fn batch_prompt(photo_ids: &[&str]) -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
    format!(
        "Analyze each of the following {count} photos. Use exactly the photoId given in each \
         photo's label.\n\n\
         Photos to analyze: {ids}\n\n\
         Reply with ONLY a JSON array, one object per photo, with these fields:\n\
         photoId, overallScore, emotion {{label, valence}}, composition, poseQuality, \
         backgroundQuality, discardReason, bestInGroup, highlights (array), issues (array), \
         summary, category, tags (array).\n\
         category must be one of: {categories}.",
        count = photo_ids.len(),
        ids = photo_ids.join(", "),
        categories = categories.join(", "),
    )
}

/// Label preceding each image in a batch request.
pub fn photo_label(photo_id: &str) -> String {
    format!("Photo {}:", photo_id)
}

pub fn album_names_prompt(keys: &[AlbumKey]) -> String {
    let listed: Vec<String> = keys
        .iter()
        .map(|k| format!("- {} (currently \"{}\")", k.as_str(), k.fallback_name()))
        .collect();
    format!(
        "Suggest a short, warm album title (at most four words) for each of these photo \
         groups from one event:\n{}\n\n\
         Reply with ONLY a JSON object mapping each key to its title.",
        listed.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_prompt_lists_ids_and_categories() {
        let prompt = batch_prompt(&["4", "9"]);
        assert!(prompt.contains("following 2 photos"));
        assert!(prompt.contains("4, 9"));
        assert!(prompt.contains("architecture"));
    }

    #[test]
    fn test_album_prompt_lists_keys() {
        let prompt = album_names_prompt(&[AlbumKey::Highlights, AlbumKey::Category(Category::Food)]);
        assert!(prompt.contains("- _highlights"));
        assert!(prompt.contains("- food"));
    }
}

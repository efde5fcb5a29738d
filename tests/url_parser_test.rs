//! Tests for Drive link / ID extraction.

use drive_batch::url_parser::extract_id;

mod drive_links {
    use super::*;

    #[test]
    fn folder_url() {
        let url = "https://drive.google.com/drive/folders/1abc123XYZ-_def456";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ-_def456");
    }

    #[test]
    fn folder_url_with_user_and_query() {
        let url = "https://drive.google.com/drive/u/0/folders/1abc123XYZ?usp=sharing";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn file_url_with_view() {
        let url = "https://drive.google.com/file/d/1abc123XYZ/view?usp=drive_link";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }

    #[test]
    fn open_url() {
        let url = "http://drive.google.com/open?id=1abc123XYZ";
        assert_eq!(extract_id(url).unwrap(), "1abc123XYZ");
    }
}

mod docs_links {
    use super::*;

    #[test]
    fn document() {
        let url = "https://docs.google.com/document/d/1DocId_42/edit?usp=sharing";
        assert_eq!(extract_id(url).unwrap(), "1DocId_42");
    }

    #[test]
    fn spreadsheet_with_fragment() {
        let url = "https://docs.google.com/spreadsheets/d/1Sheet-7/edit#gid=12";
        assert_eq!(extract_id(url).unwrap(), "1Sheet-7");
    }

    #[test]
    fn presentation_with_user() {
        let url = "https://docs.google.com/presentation/u/2/d/1Deck/edit";
        assert_eq!(extract_id(url).unwrap(), "1Deck");
    }
}

mod raw_ids {
    use super::*;

    #[test]
    fn shared_drive_id() {
        assert_eq!(extract_id("0AHxYzUk9PVA").unwrap(), "0AHxYzUk9PVA");
    }

    #[test]
    fn id_with_whitespace_trimmed() {
        assert_eq!(extract_id("\t1abc-123_XYZ\n").unwrap(), "1abc-123_XYZ");
    }
}

mod invalid_inputs {
    use super::*;

    #[test]
    fn blank() {
        assert!(extract_id("").is_err());
        assert!(extract_id(" \t\n").is_err());
    }

    #[test]
    fn foreign_or_truncated_links() {
        assert!(extract_id("https://example.com/folder/123").is_err());
        assert!(extract_id("https://drive.google.com/drive/").is_err());
        assert!(extract_id("https://docs.google.com/spreadsheets/").is_err());
    }

    #[test]
    fn invalid_characters_in_id() {
        assert!(extract_id("abc 123").is_err());
        assert!(extract_id("abc/123").is_err());
        assert!(extract_id("abc@123").is_err());
    }

    #[test]
    fn error_names_the_input() {
        let err = extract_id("not an id").unwrap_err();
        assert!(err.to_string().contains("not an id"));
    }
}

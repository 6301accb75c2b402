use intentforge::{parse_utterance, Span};

#[test]
fn test_two_slots_are_mapped_to_clean_offsets() {
    let raw = "I like [Kanye](artist) and [Jay](artist)";
    let parsed = parse_utterance(raw);

    assert_eq!(parsed.utterance, "I like Kanye and Jay");
    assert_eq!(parsed.parsed_slots.len(), 2);

    let kanye = &parsed.parsed_slots[0];
    assert_eq!(kanye.name, "artist");
    assert_eq!(kanye.value, "Kanye");
    assert_eq!(kanye.raw_position, Span::new(7, 22));
    assert_eq!(kanye.clean_position, Span::new(7, 12));

    let jay = &parsed.parsed_slots[1];
    assert_eq!(jay.value, "Jay");
    assert_eq!(jay.raw_position, Span::new(27, 40));
    assert_eq!(jay.clean_position, Span::new(17, 20));
}

#[test]
fn test_clean_positions_index_the_clean_text() {
    let inputs = [
        "book a table at [Chez Panisse](restaurant) for [four](party_size) people",
        "[tomorrow](date)",
        "fly from [Zürich](city) to [São Paulo](city)",
        "[a](x)[b](y)",
    ];
    for raw in inputs {
        let parsed = parse_utterance(raw);
        for slot in &parsed.parsed_slots {
            assert_eq!(&parsed.utterance[slot.clean_position.range()], slot.value, "in {:?}", raw);
            assert!(raw[slot.raw_position.range()].starts_with('['));
            assert!(raw[slot.raw_position.range()].ends_with(')'));
        }
    }
}

#[test]
fn test_text_without_annotations_is_unchanged() {
    for raw in ["", "just text", "brackets [without] a slot", "(parens) [only]", "[unclosed](slot"] {
        let parsed = parse_utterance(raw);
        assert_eq!(parsed.utterance, raw);
        assert!(parsed.parsed_slots.is_empty());
    }
}

#[test]
fn test_annotations_can_be_restored() {
    let raw = "play [Bohemian Rhapsody](song) by [Queen](artist)";
    assert_eq!(parse_utterance(raw).reinsert_annotations(), raw);
}
